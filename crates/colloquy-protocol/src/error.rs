//! Error types for the protocol layer.
//!
//! A `ProtocolError` never ends a connection. The gateway logs it and drops
//! the offending frame.

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing required field,
    /// or a field of the wrong type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame was well-formed but its `type` tag names no known envelope.
    #[error("unknown envelope type: {0:?}")]
    UnknownType(String),

    /// The frame decoded but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
