//! Error types for the Nodewatch agent

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Nodewatch agent
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP transport error: {0}")]
    Http(#[source] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file parse error
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shared key is not valid base64
    #[error("Invalid shared key: {0}")]
    InvalidSharedKey(String),

    // =========================================================================
    // Sampling Errors
    // =========================================================================
    /// Process query failed
    #[error("Process query failed for pid {pid}: {reason}")]
    ProcessQuery { pid: u32, reason: String },

    /// Counter read failed in a way that is not a transient condition
    #[error("Counter '{counter}' failed: {reason}")]
    Counter { counter: String, reason: String },

    // =========================================================================
    // Reporting Errors
    // =========================================================================
    /// Health report could not be delivered to the health sink
    #[error("Health report failed: {0}")]
    HealthReport(String),

    /// Telemetry request could not be built
    #[error("Telemetry request failed: {0}")]
    Telemetry(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Internal("boom".into()).is_cancelled());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ProcessQuery {
            pid: 42,
            reason: "gone".into(),
        };
        assert_eq!(err.to_string(), "Process query failed for pid 42: gone");

        let err = Error::Counter {
            counter: "handles".into(),
            reason: "permission denied".into(),
        };
        assert_eq!(err.to_string(), "Counter 'handles' failed: permission denied");
    }
}
