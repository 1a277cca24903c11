//! Error types for pacemaker-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacemakerError {
    #[error("Connection not ready: {0}")]
    ConnectionNotReady(String),

    #[error("Bad correlation id: {0}")]
    BadCorrelationId(i32),

    #[error("No pending request for correlation id {0}")]
    UnknownResponse(i32),

    #[error("Connection lost: slot {slot} resubmitted {resubmits} times")]
    ConnectionLost { slot: usize, resubmits: u32 },

    #[error("Client is shut down")]
    Shutdown,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Authentication configuration error: {0}")]
    AuthConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PacemakerError {
    /// Whether the error is local to one attempt and the caller's loop should keep going.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PacemakerError::ConnectionNotReady(_) | PacemakerError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PacemakerError::ConnectionNotReady("waiting".into()).is_transient());
        assert!(PacemakerError::Transport("reset".into()).is_transient());
        assert!(!PacemakerError::Shutdown.is_transient());
        assert!(!PacemakerError::AuthConfig("no secret".into()).is_transient());
    }

    #[test]
    fn test_connection_lost_message() {
        let err = PacemakerError::ConnectionLost { slot: 7, resubmits: 5 };
        assert_eq!(err.to_string(), "Connection lost: slot 7 resubmitted 5 times");
    }
}
