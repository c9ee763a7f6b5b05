use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Upstream errors
    #[error("No upstream proxies available")]
    NoUpstreamsAvailable,

    #[error("Upstream connection to {address} failed: {reason}")]
    UpstreamConnectFailed { address: String, reason: String },

    #[error("Invalid upstream address: {0}")]
    InvalidUpstreamAddress(String),

    #[error("Operation timed out")]
    Timeout,

    // Server errors
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Giving up after {count} accept errors")]
    TooManyErrors { count: u32 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Whether the error only affects a single relayed connection
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            RelayError::NoUpstreamsAvailable
                | RelayError::UpstreamConnectFailed { .. }
                | RelayError::Timeout
                | RelayError::Io(_)
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidUpstreamAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RelayError::NoUpstreamsAvailable.to_string(),
            "No upstream proxies available"
        );
        assert_eq!(
            RelayError::UpstreamConnectFailed {
                address: "10.0.0.1:3128".to_string(),
                reason: "connection refused".to_string(),
            }
            .to_string(),
            "Upstream connection to 10.0.0.1:3128 failed: connection refused"
        );
        assert_eq!(
            RelayError::TooManyErrors { count: 100 }.to_string(),
            "Giving up after 100 accept errors"
        );
    }

    #[test]
    fn test_error_scope() {
        assert!(RelayError::Timeout.is_connection_scoped());
        assert!(RelayError::NoUpstreamsAvailable.is_connection_scoped());
        assert!(!RelayError::InvalidConfig("bad".to_string()).is_connection_scoped());
        assert!(!RelayError::TooManyErrors { count: 1 }.is_connection_scoped());
    }

    #[test]
    fn test_error_from_url_parse() {
        let err: RelayError = url::Url::parse("http://[::1").unwrap_err().into();
        assert!(matches!(err, RelayError::InvalidUpstreamAddress(_)));
    }
}
