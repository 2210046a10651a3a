//! In-memory connection pairs.
//!
//! Two [`MemoryConnection`]s joined by unbounded channels. Whatever one
//! side sends, the other receives, in order. Closing either side makes
//! both sides' `recv()` return `Ok(None)` once buffered packets drain.
//!
//! Used by the session engine's unit tests, where binding real sockets
//! would only add noise.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use tokio::sync::{Mutex, mpsc, watch};

use crate::{Connection, ConnectionId, TransportError};

/// Fake ports so each memory endpoint has a distinct peer address in logs.
static NEXT_PORT: AtomicU16 = AtomicU16::new(40_000);

struct Inbox {
    packets: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: watch::Receiver<bool>,
}

/// One end of an in-memory link.
pub struct MemoryConnection {
    id: ConnectionId,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    inbox: Mutex<Inbox>,
    closed: Arc<watch::Sender<bool>>,
}

/// Creates two connected endpoints.
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let closed = Arc::new(closed_tx);
    let a = MemoryConnection {
        id: ConnectionId::next(),
        peer: fake_addr(),
        tx: a_tx,
        inbox: Mutex::new(Inbox {
            packets: a_rx,
            closed: closed_rx.clone(),
        }),
        closed: Arc::clone(&closed),
    };
    let b = MemoryConnection {
        id: ConnectionId::next(),
        peer: fake_addr(),
        tx: b_tx,
        inbox: Mutex::new(Inbox {
            packets: b_rx,
            closed: closed_rx,
        }),
        closed,
    };
    (a, b)
}

fn fake_addr() -> SocketAddr {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

impl MemoryConnection {
    /// Returns `true` once either end has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // The sender lives as long as either endpoint, so an error here only
    // means the pair is being torn down.
    let _ = closed.wait_for(|c| *c).await;
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed("memory link closed".into()));
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut inbox = self.inbox.lock().await;
        let Inbox { packets, closed } = &mut *inbox;
        // Biased so packets sent before the close still drain in order.
        tokio::select! {
            biased;
            packet = packets.recv() => Ok(packet),
            () = wait_closed(closed) => Ok(packets.try_recv().ok()),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
