//! Unified error handling for the track-merge library.
//!
//! Only conditions that abort a run (or, for rate limiting, pause it) are
//! errors. Per-point and per-activity data problems are contained locally:
//! see [`crate::activity::RejectReason`].

use thiserror::Error;

/// Unified error type for track-merge operations.
#[derive(Debug, Error)]
pub enum TrackMergeError {
    /// Missing or unusable configuration (credentials, paths)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The OAuth flow did not yield a usable code or token
    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    /// The activity source asked us to slow down
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// HTTP/API error other than rate limiting
    #[error("HTTP error{}: {message}", status_suffix(.status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Dataset or export could not be written
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map(|c| format!(" ({c})")).unwrap_or_default()
}

impl TrackMergeError {
    /// True for the one condition the pipeline recovers from by backing off.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TrackMergeError::RateLimited { .. })
    }
}

/// Result type alias for track-merge operations.
pub type Result<T> = std::result::Result<T, TrackMergeError>;

/// Extension trait for converting Option to TrackMergeError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a configuration error.
    fn ok_or_config(self, message: &str) -> Result<T>;

    /// Convert Option to Result with an authorization error.
    fn ok_or_authorization(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackMergeError::Config {
            message: message.to_string(),
        })
    }

    fn ok_or_authorization(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackMergeError::Authorization {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackMergeError::Http {
            message: "not found".to_string(),
            status_code: Some(404),
        };
        assert_eq!(err.to_string(), "HTTP error (404): not found");

        let err = TrackMergeError::Http {
            message: "connection reset".to_string(),
            status_code: None,
        };
        assert_eq!(err.to_string(), "HTTP error: connection reset");
    }

    #[test]
    fn test_is_rate_limit() {
        let limited = TrackMergeError::RateLimited {
            message: "429".to_string(),
        };
        assert!(limited.is_rate_limit());

        let other = TrackMergeError::Config {
            message: "missing".to_string(),
        };
        assert!(!other.is_rate_limit());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<String> = None;
        let result = none.ok_or_config("CLIENT_ID must be set");
        assert!(matches!(result, Err(TrackMergeError::Config { .. })));

        let none: Option<String> = None;
        let result = none.ok_or_authorization("no code");
        assert!(matches!(result, Err(TrackMergeError::Authorization { .. })));

        assert_eq!(Some(3).ok_or_config("unused").ok(), Some(3));
    }
}
