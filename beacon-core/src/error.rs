//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transmission to the collection service failed
    ///
    /// `status` is `None` when no HTTP response was received at all
    /// (connection refused, timeout, DNS failure).
    #[error("transport error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Event record whose typed fields do not match its declared kind
    #[error("invalid event record: {0}")]
    InvalidRecord(String),

    /// The durable queue could not be opened or is unusable
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Background worker channel error
    #[error("worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Whether a failed transmission is worth retrying within the same flush.
    ///
    /// Server errors, rate limiting and network failures are transient;
    /// client errors (4xx) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport { status: None, .. } => true,
            Error::Transport {
                status: Some(code), ..
            } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let server = Error::Transport {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        let network = Error::Transport {
            status: None,
            message: "connection refused".to_string(),
        };
        let throttled = Error::Transport {
            status: Some(429),
            message: "slow down".to_string(),
        };
        let rejected = Error::Transport {
            status: Some(400),
            message: "bad request".to_string(),
        };

        assert!(server.is_transient());
        assert!(network.is_transient());
        assert!(throttled.is_transient());
        assert!(!rejected.is_transient());
        assert!(!Error::Config("x".to_string()).is_transient());
    }

    #[test]
    fn test_transport_display_includes_status() {
        let err = Error::Transport {
            status: Some(500),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "transport error (500): boom");

        let err = Error::Transport {
            status: None,
            message: "refused".to_string(),
        };
        assert_eq!(err.to_string(), "transport error: refused");
    }
}
