//! Error taxonomy for the session coordinator.
//!
//! Only `Validation` is ever returned from the operator verbs (start, stop,
//! speed, inject, reset). Transport and remote failures there are converted
//! into the session's `last_error` message; protocol errors are logged and
//! dropped.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// HTTP or socket failure (connect refused, timeout, reset).
    Transport(String),
    /// The remote service answered with a non-2xx status.
    RemoteStatus {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// Inbound payload could not be decoded.
    Protocol(String),
    /// Caller supplied an invalid argument; nothing was mutated.
    Validation(String),
}

impl CoreError {
    pub fn transport(err: impl fmt::Display) -> Self {
        CoreError::Transport(err.to_string())
    }

    pub fn protocol(err: impl fmt::Display) -> Self {
        CoreError::Protocol(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Transport(msg) => write!(f, "transport error: {}", msg),
            CoreError::RemoteStatus {
                endpoint,
                status,
                body,
            } => {
                if body.is_empty() {
                    write!(f, "{} returned {}", endpoint, status)
                } else {
                    write!(f, "{} returned {}: {}", endpoint, status, body)
                }
            }
            CoreError::Protocol(msg) => write!(f, "malformed message: {}", msg),
            CoreError::Validation(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Protocol(err.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_display() {
        let err = CoreError::RemoteStatus {
            endpoint: "POST /control/start".to_string(),
            status: 503,
            body: "Models not ready".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "POST /control/start returned 503: Models not ready"
        );

        let bare = CoreError::RemoteStatus {
            endpoint: "GET /status".to_string(),
            status: 500,
            body: String::new(),
        };
        assert_eq!(bare.to_string(), "GET /status returned 500");
    }

    #[test]
    fn test_validation_flag() {
        assert!(CoreError::validation("speed must be positive").is_validation());
        assert!(!CoreError::transport("refused").is_validation());
    }
}
