//! Repository utilities.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::result::DatabaseErrorInformation;

/// Simple error info wrapper for database errors.
#[derive(Debug)]
pub struct DbErrorInfo(pub String);

impl DatabaseErrorInformation for DbErrorInfo {
    fn message(&self) -> &str {
        &self.0
    }
    fn details(&self) -> Option<&str> {
        None
    }
    fn hint(&self) -> Option<&str> {
        None
    }
    fn table_name(&self) -> Option<&str> {
        None
    }
    fn column_name(&self) -> Option<&str> {
        None
    }
    fn constraint_name(&self) -> Option<&str> {
        None
    }
    fn statement_position(&self) -> Option<i32> {
        None
    }
}

/// Convert any displayable error to a diesel error with proper message.
pub fn to_diesel_error(e: impl std::fmt::Display) -> diesel::result::Error {
    diesel::result::Error::DatabaseError(
        diesel::result::DatabaseErrorKind::Unknown,
        Box::new(DbErrorInfo(e.to_string())),
    )
}

/// Wrap a decode failure as a diesel deserialization error.
pub fn deserialization_error(msg: impl Into<String>) -> diesel::result::Error {
    diesel::result::Error::DeserializationError(msg.into().into())
}

/// Fixed-width UTC timestamp text, so lexical order is chronological.
pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_ts_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(format_ts)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, diesel::result::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| deserialization_error(format!("invalid timestamp '{}': {}", s, e)))
}

pub fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>, diesel::result::Error> {
    s.as_deref().map(parse_ts).transpose()
}
