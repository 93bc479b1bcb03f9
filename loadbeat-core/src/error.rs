use thiserror::Error;

/// Errors that can occur in the load harness library
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A random draw was requested with `min > max` (or NaN bounds)
    #[error("Invalid range: min {min} is greater than max {max}")]
    InvalidRange { min: String, max: String },

    /// A weight that is NaN or infinite
    #[error("Invalid weight at index {index}: {weight}")]
    InvalidWeight { index: usize, weight: String },

    /// An operation that needs at least one element got none
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Paired inputs with different lengths
    #[error("Length mismatch: {left} items vs {right} weights")]
    LengthMismatch { left: usize, right: usize },

    /// Response body absent or not valid JSON
    #[error("Malformed body: {0}")]
    MalformedBody(String),

    /// JSON was valid but did not match the expected envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A precondition prepared in setup is unavailable
    #[error("Setup failed: {0}")]
    FatalSetup(String),

    /// Threshold expression could not be parsed
    #[error("Invalid threshold '{expr}': {reason}")]
    InvalidThreshold { expr: String, reason: String },

    /// Duration string could not be parsed
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// No ramp profile registered under this name
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// No journey registered under this name
    #[error("Unknown journey: {0}")]
    UnknownJourney(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub(crate) fn invalid_range<T: std::fmt::Display>(min: T, max: T) -> Self {
        HarnessError::InvalidRange {
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        HarnessError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::Config("BASE_URL is required".to_string());
        assert_eq!(err.to_string(), "Configuration error: BASE_URL is required");
    }

    #[test]
    fn test_invalid_range_display() {
        let err = HarnessError::invalid_range(5, 1);
        assert_eq!(err.to_string(), "Invalid range: min 5 is greater than max 1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HarnessError = io_err.into();
        assert!(matches!(err, HarnessError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        let err: HarnessError = json_err.into();
        assert!(matches!(err, HarnessError::Serialization(_)));
    }
}
