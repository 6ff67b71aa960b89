//! Error types for bulk submission.

use thiserror::Error;

/// Errors surfaced by the bulk client.
#[derive(Error, Debug)]
pub enum ElasticError {
    /// HTTP transport failure (connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The bulk endpoint answered with a non-2xx status.
    #[error("bulk endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Bulk payload could not be encoded or the response could not be parsed.
    #[error("bulk serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed endpoint configuration.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl ElasticError {
    /// Create an endpoint configuration error.
    pub fn endpoint(msg: impl Into<String>) -> Self {
        Self::Endpoint(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Transient transport failures and server-side overload answers may
    /// succeed on retry; everything else is permanent.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Serialization(_) | Self::Endpoint(_) => false,
        }
    }
}

/// Result type for bulk operations.
pub type Result<T> = std::result::Result<T, ElasticError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        let err = ElasticError::Http {
            status: 400,
            body: "mapper_parsing_exception".to_string(),
        };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("mapper_parsing_exception"));
    }

    #[test]
    fn test_http_retriable_classification() {
        assert!(ElasticError::Http {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(ElasticError::Http {
            status: 429,
            body: String::new()
        }
        .is_retriable());
        assert!(!ElasticError::Http {
            status: 400,
            body: String::new()
        }
        .is_retriable());
    }

    #[test]
    fn test_endpoint_not_retriable() {
        assert!(!ElasticError::endpoint("empty endpoint").is_retriable());
    }
}
