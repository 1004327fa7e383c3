//! Settings error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The settings file is not JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser failure, with line and column.
        #[source]
        source: serde_json::Error,
    },
    /// The merged document has a value of the wrong type for a field.
    #[error("settings do not fit the schema: {0}")]
    Schema(#[source] serde_json::Error),
    /// A field holds a value the server cannot run with.
    #[error("{field} {requirement}")]
    OutOfRange {
        /// camelCase path of the offending field.
        field: &'static str,
        /// What the value must satisfy.
        requirement: String,
    },
}

impl SettingsError {
    pub(crate) fn out_of_range(field: &'static str, requirement: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            requirement: requirement.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_names_the_field() {
        let err = SettingsError::out_of_range("server.hubQueueCapacity", "must be greater than 0");
        assert_eq!(err.to_string(), "server.hubQueueCapacity must be greater than 0");
    }

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/peerlink/settings.json"),
            source,
        };
        let text = err.to_string();
        assert!(text.starts_with("/etc/peerlink/settings.json is not valid JSON"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
