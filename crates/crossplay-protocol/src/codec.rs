//! Codec trait and implementations for turning packets into bytes.
//!
//! Both links carry serde-derived packet enums. [`BincodeCodec`] is what
//! runs in production; [`JsonCodec`] produces the same packets as JSON,
//! which is handy when a capture needs to be read by a human.

use bincode::Options;
use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Upper bound on a single decoded packet. Matches the largest frame the
/// transports accept, so a lying length prefix cannot allocate more.
pub const MAX_PACKET_LEN: u64 = 2 * 1024 * 1024;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec is shared by every session
/// task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an encode error if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a decode error if the bytes are malformed, truncated, or do
    /// not match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A compact binary [`Codec`] built on `bincode`.
///
/// Integers are varint-encoded and decoding is capped at
/// [`MAX_PACKET_LEN`].
///
/// ```rust
/// use crossplay_protocol::{BincodeCodec, Codec, edition_b};
///
/// let codec = BincodeCodec;
/// let packet = edition_b::Packet::KeepAlive { id: 42 };
/// let bytes = codec.encode(&packet).unwrap();
/// let back: edition_b::Packet = codec.decode(&bytes).unwrap();
/// assert_eq!(packet, back);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PACKET_LEN)
        .reject_trailing_bytes()
}

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode_options()
            .serialize(value)
            .map_err(ProtocolError::BincodeEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        bincode_options()
            .deserialize(data)
            .map_err(ProtocolError::BincodeDecode)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
