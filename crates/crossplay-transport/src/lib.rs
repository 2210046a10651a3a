//! Transport abstraction layer for Crossplay.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the two very different links a gateway session owns:
//!
//! - the client-facing link, a connectionless datagram protocol with its
//!   own framing, fragmentation and batch compression ([`datagram`]);
//! - the backend-facing link, a length-prefixed TCP stream with a
//!   negotiated compression threshold ([`stream`]).
//!
//! The session engine only ever talks to the traits, so tests can swap in
//! the in-memory pair from [`memory`].
//!
//! # Feature Flags
//!
//! - `datagram` (default): UDP transport for the client-facing edition
//! - `stream` (default): TCP transport for the backend-facing edition

mod compression;
mod error;
pub mod memory;

#[cfg(feature = "datagram")]
pub mod datagram;
#[cfg(feature = "stream")]
pub mod stream;

pub use compression::Compression;
pub use error::TransportError;
pub use memory::MemoryConnection;

#[cfg(feature = "datagram")]
pub use datagram::{DatagramClient, DatagramConnection, DatagramTransport, QueryHandler};
#[cfg(feature = "stream")]
pub use stream::{StreamConnection, StreamTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs across every transport.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// The returned futures are `Send` so that code generic over a transport
/// can still be handed to `tokio::spawn`.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A single connection that can send and receive whole packets.
///
/// Framing, fragmentation and compression are the connection's business;
/// callers always see complete packet bodies.
pub trait Connection: Send + Sync + 'static {
    /// Sends one packet body to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next packet body from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. Must be
    /// cancel-safe: dropping the future before it resolves loses no data.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection. Calling it more than once is a no-op.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the address of the remote peer.
    fn peer_addr(&self) -> SocketAddr;

    /// Enables compression for every packet at least `threshold` bytes
    /// long, or disables it with `None`.
    ///
    /// Takes effect for the next packet in both directions. Transports
    /// without compression support ignore it.
    fn set_compression_threshold(&self, threshold: Option<usize>) {
        let _ = threshold;
    }
}
