/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outbound connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The remote side did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A frame could not be parsed (bad header, oversized, truncated).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Compressing or inflating a frame body failed.
    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

// Needed by the stream codec: tokio-util decoders and encoders surface
// socket errors through `From<io::Error>`.
impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::ReceiveFailed(e)
    }
}

impl TransportError {
    /// Returns `true` if the error means the peer is simply gone, as
    /// opposed to having sent something we could not understand.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::Shutdown | Self::Timeout(_)
        )
    }
}
