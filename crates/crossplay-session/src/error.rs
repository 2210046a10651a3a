//! Error types for the session layer.

use crossplay_protocol::SessionId;

use crate::SessionState;

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The identity service rejected the player.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The client capability payload could not be read.
    #[error("malformed client data: {0}")]
    MalformedClientData(String),

    /// A write-once field was written twice.
    #[error("{0} already set")]
    AlreadySet(&'static str),

    /// The state machine refused a transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// The session is already in the registry.
    #[error("session {0} is already registered")]
    AlreadyRegistered(SessionId),

    /// The registry is shutting down and admits no new sessions.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// The session's task is gone, so it cannot take commands.
    #[error("session {0} is closed")]
    Closed(SessionId),
}

impl SessionError {
    /// Returns `true` for errors that mean "who you are was not accepted".
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailed(_) | Self::MalformedClientData(_))
    }
}
