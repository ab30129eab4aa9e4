//! Error types for the Filament core domain
//!
//! These errors never surface on the instrumentation hot path. The facade
//! returns no-op sentinels instead of propagating failures into host code;
//! `Result` is confined to serialization and snapshot/aggregate build paths.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors (snapshot and aggregate JSON)
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Histogram encode/decode errors
    #[error("Histogram error: {0}")]
    Histogram(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("bad threshold".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad threshold");
    }

    #[test]
    fn test_serde_json_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
