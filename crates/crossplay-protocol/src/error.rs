//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means bytes and packets disagreed: something
//! could not be serialized, or something on the wire could not be read
//! back as a packet.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Binary serialization failed.
    #[error("encode failed: {0}")]
    BincodeEncode(#[source] bincode::Error),

    /// Binary bytes did not form a valid packet (truncated, unknown
    /// variant, oversized length prefix).
    #[error("decode failed: {0}")]
    BincodeDecode(#[source] bincode::Error),

    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON bytes did not form a valid packet.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The packet decoded but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A text field was not in the expected format.
    #[error("malformed advertisement: {0}")]
    MalformedAdvertisement(String),
}

impl ProtocolError {
    /// Returns `true` for errors raised while reading inbound bytes.
    pub fn is_decode(&self) -> bool {
        match self {
            Self::BincodeDecode(_) | Self::InvalidMessage(_) | Self::MalformedAdvertisement(_) => {
                true
            }
            #[cfg(feature = "json")]
            Self::Decode(_) => true,
            _ => false,
        }
    }
}
