//! Error taxonomy for the chat hub.
//!
//! Protocol-level violations are reported to the offending connection only;
//! persistence failures keep the session visibly Active so the timeout sweep
//! retries settlement. Nothing here terminates the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("session not found")]
    SessionNotFound,

    #[error("not a participant of this session")]
    NotAuthorized,

    #[error("only the counselor may end the session")]
    Forbidden,

    /// Idempotent no-op: a client leave and a timeout may race.
    #[error("session already ended")]
    AlreadyEnded,

    /// A leave on a session that never reached Active.
    #[error("session is not active")]
    NotActive,

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("message not found")]
    MessageNotFound,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl HubError {
    /// True for conditions that are expected races rather than faults.
    pub fn is_benign(&self) -> bool {
        matches!(self, HubError::AlreadyEnded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_client_safe() {
        assert_eq!(HubError::SessionNotFound.to_string(), "session not found");
        assert_eq!(
            HubError::UnknownMessageType("bogus".into()).to_string(),
            "unknown message type: bogus"
        );
    }

    #[test]
    fn already_ended_is_benign() {
        assert!(HubError::AlreadyEnded.is_benign());
        assert!(!HubError::Forbidden.is_benign());
    }
}
