//! Codec trait and implementations.
//!
//! A codec converts between Rust values and raw frame bytes. The gateway only
//! talks to the [`Codec`] trait, so the wire format can change without
//! touching routing or room code. [`JsonCodec`] is the format browsers speak.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Envelope, ProtocolError};

/// Just the tag of an envelope, used to classify decode failures.
#[derive(Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
}

/// Encodes values to frame bytes and decodes them back.
///
/// `Send + Sync + 'static` because a single codec is shared by every
/// connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or do not
    /// match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes an inbound [`Envelope`], telling an unrecognized `type` apart
    /// from a malformed body.
    ///
    /// # Errors
    /// - [`ProtocolError::UnknownType`] if the `type` tag names no envelope.
    /// - [`ProtocolError::Decode`] for anything else that fails to parse.
    fn decode_envelope(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        match self.decode::<Envelope>(data) {
            Ok(envelope) => Ok(envelope),
            Err(err) => match self.decode::<Header>(data) {
                Ok(header) if !Envelope::KINDS.contains(&header.kind.as_str()) => {
                    Err(ProtocolError::UnknownType(header.kind))
                }
                _ => Err(err),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`. Behind the `json` feature (on by default).
///
/// ```rust
/// use colloquy_protocol::{Codec, Envelope, Heartbeat, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&Envelope::Heartbeat(Heartbeat { client_time: 5000 })).unwrap();
/// let decoded = codec.decode_envelope(&bytes).unwrap();
/// assert_eq!(decoded.kind(), "heartbeat");
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{BeginSession, ServerEvent, SessionPin};

    #[test]
    fn test_decode_envelope_valid_frame() {
        let codec = JsonCodec;
        let env = codec
            .decode_envelope(br#"{"type":"begin_session","pin":"AB12-CD34"}"#)
            .unwrap();
        assert_eq!(
            env,
            Envelope::BeginSession(BeginSession {
                pin: SessionPin::new("AB12-CD34")
            })
        );
    }

    #[test]
    fn test_decode_envelope_unknown_type_is_classified() {
        let codec = JsonCodec;
        let err = codec
            .decode_envelope(br#"{"type":"teleport","pin":"AB12-CD34"}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "teleport"));
    }

    #[test]
    fn test_decode_envelope_known_type_missing_field_is_decode_error() {
        let codec = JsonCodec;
        let err = codec.decode_envelope(br#"{"type":"begin_session"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_decode_envelope_garbage_is_decode_error() {
        let codec = JsonCodec;
        let err = codec.decode_envelope(b"not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_encode_server_event() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&ServerEvent::ParticipantCount { count: 3 })
            .unwrap();
        assert_eq!(bytes, br#"{"type":"participant_count","count":3}"#);
    }
}
