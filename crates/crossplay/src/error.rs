//! Unified error type for the Crossplay gateway.

use std::time::Duration;

use crossplay_protocol::{DisconnectCategory, DisconnectReason, ProtocolError};
use crossplay_session::SessionError;
use crossplay_transport::TransportError;

/// Why the backend link could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    /// Nothing answered at the backend address.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered but refused the player.
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// The identity service refused the player during the login challenge.
    #[error(transparent)]
    Identity(#[from] SessionError),

    /// The backend spoke something we do not understand.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("backend did not finish within {0:?}")]
    Timeout(Duration),

    /// The link broke after it was opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ProtocolError> for DownstreamError {
    fn from(e: ProtocolError) -> Self {
        Self::ProtocolMismatch(e.to_string())
    }
}

impl DownstreamError {
    pub fn category(&self) -> DisconnectCategory {
        match self {
            Self::Identity(_) => DisconnectCategory::AuthFailure,
            _ => DisconnectCategory::BackendUnreachable,
        }
    }

    /// The line shown to the player.
    ///
    /// Tells "could not connect" apart from "connected but rejected".
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) | Self::Transport(_) => {
                DisconnectCategory::BackendUnreachable.default_message().to_string()
            }
            Self::Rejected(reason) => format!("Rejected by the server: {reason}"),
            Self::Identity(_) => DisconnectCategory::AuthFailure.default_message().to_string(),
            Self::ProtocolMismatch(_) => "Incompatible server version".to_string(),
        }
    }
}

/// Top-level error that wraps all crate-specific errors.
///
/// Also the reason a session ended: orderly closes (client quit, kick,
/// shutdown) are variants too, so a session task has one exit type.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client link failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend link failed after the session was established.
    #[error("backend link failed: {0}")]
    BackendLink(TransportError),

    /// A packet from either link did not decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("cannot read config: {0}")]
    ConfigFile(#[from] std::io::Error),

    /// The client asked for a protocol version we do not speak.
    #[error("unsupported client protocol {0}")]
    UnsupportedVersion(u32),

    /// A login packet arrived out of order.
    #[error("handshake violation: {0}")]
    Handshake(&'static str),

    #[error("client refused the resource packs")]
    PacksRefused,

    #[error("handshake not finished within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("client silent for {0:?}")]
    IdleTimeout(Duration),

    #[error("client disconnected")]
    ClientQuit,

    #[error("backend closed the session: {0}")]
    BackendClosed(String),

    /// Closed on request through the session handle.
    #[error("session closed: {}", .0.message)]
    Kicked(DisconnectReason),

    #[error("gateway shutting down")]
    ShuttingDown,
}

impl GatewayError {
    pub fn category(&self) -> DisconnectCategory {
        match self {
            Self::Transport(_)
            | Self::BackendLink(_)
            | Self::Protocol(_)
            | Self::IdleTimeout(_)
            | Self::HandshakeTimeout(_) => DisconnectCategory::TransportFailure,
            Self::Session(_)
            | Self::UnsupportedVersion(_)
            | Self::Handshake(_)
            | Self::PacksRefused => DisconnectCategory::AuthFailure,
            Self::Downstream(e) => e.category(),
            Self::Config(_) | Self::ConfigFile(_) | Self::ShuttingDown => DisconnectCategory::ServerShutdown,
            Self::BackendClosed(_) | Self::ClientQuit => DisconnectCategory::ClientQuit,
            Self::Kicked(reason) => reason.category,
        }
    }

    /// The reason shown to the player.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Downstream(e) => DisconnectReason::new(e.category(), e.user_message()),
            Self::BackendClosed(message) => DisconnectReason::new(self.category(), message.clone()),
            Self::Kicked(reason) => reason.clone(),
            _ => DisconnectReason::from_category(self.category()),
        }
    }

    /// Returns `false` when the client link itself is gone, so there is
    /// no point sending a disconnect packet.
    pub fn client_reachable(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::IdleTimeout(_) | Self::ClientQuit)
    }

    /// Returns `true` for endings that are not failures.
    pub fn is_orderly(&self) -> bool {
        !self.category().is_failure()
    }
}
