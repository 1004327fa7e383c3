//! Decoding helpers for stored text columns.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, StoreError};

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_time(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("{column}: {e}")))
}

/// Parse an optional RFC 3339 timestamp column.
pub(crate) fn parse_opt_time(column: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_time(column, r)).transpose()
}

/// Parse any `FromStr` column (ids, enums).
pub(crate) fn parse_col<T>(column: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| StoreError::CorruptRow(format!("{column}: {e}")))
}
