//! Conversions from stored column values.
//!
//! Every failure surfaces as a `rusqlite` conversion error so row mappers can
//! use `?` throughout.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Error as SqlError;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use uuid::Uuid;

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> SqlError {
    SqlError::FromSqlConversionFailure(column, Type::Text, err.into())
}

pub(crate) fn parse_datetime(column: usize, s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

pub(crate) fn parse_datetime_opt(
    column: usize,
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, SqlError> {
    s.map(|s| parse_datetime(column, &s)).transpose()
}

pub(crate) fn parse_uuid(column: usize, s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| conversion_error(column, e))
}

/// Parses a lowercase enum name such as a status or message kind.
pub(crate) fn parse_name<T>(column: usize, s: &str) -> Result<T, SqlError>
where
    T: FromStr<Err = String>,
{
    s.parse().map_err(|e: String| conversion_error(column, e))
}

pub(crate) fn parse_json<T: DeserializeOwned>(column: usize, s: &str) -> Result<T, SqlError> {
    serde_json::from_str(s).map_err(|e| conversion_error(column, e))
}

/// Extension trait for turning "no rows" into `None`.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
