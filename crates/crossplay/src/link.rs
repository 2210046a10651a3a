//! Packet-level send and receive over a byte [`Connection`].
//!
//! Both links carry bincode-encoded packets. The error type is left to
//! the caller so the same helpers serve the connector and the session.

use crossplay_protocol::{BincodeCodec, Codec, ProtocolError};
use crossplay_transport::{Connection, TransportError};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) async fn send_packet<C, P, E>(conn: &C, packet: &P) -> Result<(), E>
where
    C: Connection,
    P: Serialize + Sync,
    E: From<TransportError> + From<ProtocolError>,
{
    let bytes = BincodeCodec.encode(packet)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Receives one packet. `Ok(None)` means the peer closed cleanly.
pub(crate) async fn recv_packet<C, P, E>(conn: &C) -> Result<Option<P>, E>
where
    C: Connection,
    P: DeserializeOwned,
    E: From<TransportError> + From<ProtocolError>,
{
    match conn.recv().await? {
        Some(bytes) => Ok(Some(BincodeCodec.decode(&bytes)?)),
        None => Ok(None),
    }
}
