//! Client-side error taxonomy.

use thiserror::Error;

use super::connection::ConnectionState;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Transport failure or timeout; safe to retry.
    #[error("Network error: {0}")]
    Network(String),

    /// Credential rejected. Never retried here; the session must be renewed.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// The notification no longer exists server-side.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Client is closed")]
    Closed,

    #[error("Invalid connection state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Invalid client configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same call later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Server {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            // Timeouts, refused connections, resets and TLS failures.
            Self::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ClientError::Network("timed out".into()).is_recoverable());
        assert!(
            ClientError::Server {
                status: 503,
                message: "busy".into()
            }
            .is_recoverable()
        );
        assert!(
            !ClientError::Server {
                status: 422,
                message: "bad".into()
            }
            .is_recoverable()
        );
        assert!(!ClientError::Auth("expired".into()).is_recoverable());
        assert!(!ClientError::NotFound("n1".into()).is_recoverable());
    }
}
