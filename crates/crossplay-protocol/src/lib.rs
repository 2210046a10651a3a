//! Wire protocol for Crossplay.
//!
//! This crate defines the packets both sides of the gateway speak:
//!
//! - **[`edition_a`]**: the client-facing packets, plus the table of
//!   client protocol versions the gateway accepts.
//! - **[`edition_b`]**: the backend-facing packets, grouped into the
//!   handshake, status, login and play sub-protocols.
//! - **Types** ([`SessionId`], [`DisconnectCategory`], [`Advertisement`],
//!   etc.): shared by every layer above.
//! - **Codec** ([`Codec`] trait, [`BincodeCodec`], [`JsonCodec`]): how
//!   packets become bytes.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (per-player state). It knows nothing about connections.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Session / Translate
//! ```

mod codec;
mod error;
pub mod edition_a;
pub mod edition_b;
pub mod text;
mod types;

pub use codec::{BincodeCodec, Codec, MAX_PACKET_LEN};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use text::TextComponent;
pub use types::{
    Advertisement, BackendStatus, BlockPos, DisconnectCategory, DisconnectReason, RuntimeId,
    SessionId, Vec3,
};
