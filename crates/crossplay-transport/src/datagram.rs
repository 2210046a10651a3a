//! Datagram transport for the client-facing edition.
//!
//! One UDP socket serves every client. A background pump task reads
//! datagrams, demultiplexes them by peer address and hands complete
//! packets to the matching [`DatagramConnection`]. The first byte of every
//! datagram names its frame type:
//!
//! ```text
//! 0x01 unconnected ping   [u64 ping_time][u64 client_guid]
//! 0x1c unconnected pong   [u64 ping_time][u64 server_guid][u16 len][advertisement]
//! 0x05 open request       [u8 transport_version][u16 mtu]
//! 0x06 open reply         [u64 server_guid][u16 mtu]
//! 0x19 incompatible       [u8 transport_version][u64 server_guid]
//! 0x84 data frame         [u32 sequence][u16 split_id][u16 index][u16 count][payload]
//! 0x15 disconnect
//! ```
//!
//! Unconnected pings are answered straight from the pump through the
//! [`QueryHandler`], which is synchronous on purpose: a discovery reply
//! must never wait on the network.
//!
//! Packets larger than one frame are split and reassembled. Frames are
//! sequenced, not reliable: a packet older than the last one delivered is
//! dropped instead of being delivered out of order.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;

use crate::compression::{MAX_INFLATED_LEN, Threshold};
use crate::{Compression, Connection, ConnectionId, Transport, TransportError};

/// Version of this framing. Clients on another version are refused.
pub const TRANSPORT_VERSION: u8 = 11;

/// Default maximum datagram size.
pub const DEFAULT_MTU: u16 = 1400;

/// Smallest MTU we are willing to negotiate.
pub const MIN_MTU: u16 = 576;

const ID_UNCONNECTED_PING: u8 = 0x01;
const ID_UNCONNECTED_PONG: u8 = 0x1c;
const ID_OPEN_REQUEST: u8 = 0x05;
const ID_OPEN_REPLY: u8 = 0x06;
const ID_INCOMPATIBLE: u8 = 0x19;
const ID_FRAME: u8 = 0x84;
const ID_DISCONNECT: u8 = 0x15;

/// `[id][u32 seq][u16 split_id][u16 index][u16 count]`
const FRAME_HEADER_LEN: usize = 11;
/// IP + UDP headers, which also count against the MTU.
const UDP_OVERHEAD: usize = 28;

const MAX_PENDING_SPLITS: usize = 64;
/// Pending splits further than this many sequence numbers behind are dropped.
const SPLIT_SEQ_WINDOW: u32 = 256;
const MAX_FRAGMENTS: u16 = 512;
const INBOX_CAPACITY: usize = 1024;
const ACCEPT_BACKLOG: usize = 128;
const MAX_DATAGRAM: usize = 65_535;

const MARKER_STORED: u8 = 0x00;
const MARKER_DEFLATE: u8 = 0x01;
const MARKER_NONE: u8 = 0xff;

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY: Duration = Duration::from_millis(500);

type Inbound = Result<Vec<u8>, TransportError>;

/// Answers discovery probes from clients that are not connected.
///
/// Returning `None` drops the probe silently. Implementations must not
/// block: this runs on the socket pump shared by every client.
pub trait QueryHandler: Send + Sync + 'static {
    /// Builds the advertisement string for a probe from `addr`.
    fn on_query(&self, addr: SocketAddr) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Byte helpers
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        let end = self.pos + n;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| {
            TransportError::MalformedFrame(format!(
                "truncated datagram: wanted {n} bytes at offset {}",
                self.pos
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TransportError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, TransportError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, TransportError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

fn encode_ping(ping_time: u64, guid: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(17);
    out.push(ID_UNCONNECTED_PING);
    out.extend_from_slice(&ping_time.to_be_bytes());
    out.extend_from_slice(&guid.to_be_bytes());
    out
}

fn encode_pong(ping_time: u64, guid: u64, advertisement: &str) -> Vec<u8> {
    let bytes = advertisement.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    let mut out = Vec::with_capacity(19 + len);
    out.push(ID_UNCONNECTED_PONG);
    out.extend_from_slice(&ping_time.to_be_bytes());
    out.extend_from_slice(&guid.to_be_bytes());
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
    out
}

fn encode_frame(seq: u32, split_id: u16, index: u16, count: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.push(ID_FRAME);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&split_id.to_be_bytes());
    out.extend_from_slice(&index.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

// ---------------------------------------------------------------------------
// Endpoint: the shared socket and its peers
// ---------------------------------------------------------------------------

/// A packet being reassembled from fragments.
struct Split {
    seq: u32,
    parts: Vec<Option<Vec<u8>>>,
    received: u16,
}

/// Pump-side state for one remote peer.
struct Peer {
    inbox: mpsc::Sender<Inbound>,
    splits: HashMap<u16, Split>,
    /// Sequence of the last packet handed to the connection.
    last_delivered: Option<u32>,
    mtu: u16,
}

impl Peer {
    fn new(inbox: mpsc::Sender<Inbound>, mtu: u16) -> Self {
        Self {
            inbox,
            splits: HashMap::new(),
            last_delivered: None,
            mtu,
        }
    }

    /// Feeds one data frame in. Returns a complete packet when one is ready.
    fn accept_frame(&mut self, frame: &[u8]) -> Result<Option<(u32, Vec<u8>)>, TransportError> {
        let mut r = Reader::new(frame);
        let seq = r.u32()?;
        let split_id = r.u16()?;
        let index = r.u16()?;
        let count = r.u16()?;
        let payload = r.rest();

        if count == 0 || index >= count || count > MAX_FRAGMENTS {
            return Err(TransportError::MalformedFrame(format!(
                "bad fragment {index}/{count}"
            )));
        }
        if count == 1 {
            return Ok(Some((seq, payload.to_vec())));
        }

        if !self.splits.contains_key(&split_id) {
            self.evict_stale_splits(seq);
        }
        if !self.splits.contains_key(&split_id) && self.splits.len() >= MAX_PENDING_SPLITS {
            return Err(TransportError::MalformedFrame(
                "too many pending split packets".into(),
            ));
        }
        let split = self.splits.entry(split_id).or_insert_with(|| Split {
            seq,
            parts: vec![None; count as usize],
            received: 0,
        });
        if split.parts.len() != count as usize {
            return Err(TransportError::MalformedFrame(format!(
                "split {split_id} changed fragment count"
            )));
        }
        let slot = &mut split.parts[index as usize];
        if slot.is_none() {
            *slot = Some(payload.to_vec());
            split.received += 1;
        }
        if split.received < count {
            return Ok(None);
        }

        let Some(split) = self.splits.remove(&split_id) else {
            return Ok(None);
        };
        let body = split.parts.into_iter().flatten().flatten().collect();
        Ok(Some((split.seq, body)))
    }

    /// Drops splits behind the delivered sequence or outside the window.
    /// Lost fragments are never resent.
    fn evict_stale_splits(&mut self, seq: u32) {
        let last_delivered = self.last_delivered;
        let before = self.splits.len();
        self.splits.retain(|_, split| {
            let behind = last_delivered.is_some_and(|last| split.seq <= last);
            !behind && seq.saturating_sub(split.seq) <= SPLIT_SEQ_WINDOW
        });
        let evicted = before - self.splits.len();
        if evicted > 0 {
            tracing::debug!(evicted, "dropped incomplete split packets");
        }
    }

    /// Returns `false` if a packet with `seq` would arrive out of order.
    fn in_sequence(&mut self, seq: u32) -> bool {
        match self.last_delivered {
            Some(last) if seq <= last => false,
            _ => {
                self.last_delivered = Some(seq);
                true
            }
        }
    }
}

enum Role {
    Server {
        accept_tx: mpsc::Sender<DatagramConnection>,
        query: Arc<dyn QueryHandler>,
    },
    Client,
}

struct Endpoint {
    socket: UdpSocket,
    guid: u64,
    mtu: u16,
    peers: StdMutex<HashMap<SocketAddr, Peer>>,
    pump: StdMutex<Option<AbortHandle>>,
}

impl Endpoint {
    fn remove_peer(&self, addr: &SocketAddr) -> bool {
        self.peers
            .lock()
            .map(|mut peers| peers.remove(addr).is_some())
            .unwrap_or(false)
    }

    fn stop_pump(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

/// Reads datagrams until aborted.
async fn run_pump(endpoint: Arc<Endpoint>, role: Role) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, addr) = match endpoint.socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                // ICMP port-unreachable surfaces here on some platforms;
                // it concerns one peer, not the socket.
                tracing::debug!(error = %e, "datagram receive error");
                continue;
            }
        };
        if len == 0 {
            continue;
        }
        if let Err(e) = handle_datagram(&endpoint, &role, &buf[..len], addr).await {
            tracing::debug!(%addr, error = %e, "dropping datagram");
        }
    }
}

async fn handle_datagram(
    endpoint: &Arc<Endpoint>,
    role: &Role,
    datagram: &[u8],
    addr: SocketAddr,
) -> Result<(), TransportError> {
    let mut r = Reader::new(datagram);
    match r.u8()? {
        ID_UNCONNECTED_PING => {
            let Role::Server { query, .. } = role else {
                return Ok(());
            };
            let ping_time = r.u64()?;
            let _client_guid = r.u64()?;
            if let Some(advertisement) = query.on_query(addr) {
                let pong = encode_pong(ping_time, endpoint.guid, &advertisement);
                endpoint
                    .socket
                    .send_to(&pong, addr)
                    .await
                    .map_err(TransportError::SendFailed)?;
            }
        }
        ID_OPEN_REQUEST => {
            let Role::Server { accept_tx, .. } = role else {
                return Ok(());
            };
            handle_open_request(endpoint, accept_tx, &mut r, addr).await?;
        }
        ID_FRAME => deliver_frame(endpoint, r.rest(), addr),
        ID_DISCONNECT => {
            if endpoint.remove_peer(&addr) {
                tracing::debug!(%addr, "peer sent disconnect");
            }
        }
        other => {
            tracing::trace!(%addr, id = other, "ignoring unknown datagram id");
        }
    }
    Ok(())
}

async fn handle_open_request(
    endpoint: &Arc<Endpoint>,
    accept_tx: &mpsc::Sender<DatagramConnection>,
    r: &mut Reader<'_>,
    addr: SocketAddr,
) -> Result<(), TransportError> {
    let version = r.u8()?;
    let requested_mtu = r.u16()?;

    if version != TRANSPORT_VERSION {
        tracing::debug!(%addr, version, "refusing incompatible transport version");
        let mut reply = vec![ID_INCOMPATIBLE, TRANSPORT_VERSION];
        reply.extend_from_slice(&endpoint.guid.to_be_bytes());
        endpoint
            .socket
            .send_to(&reply, addr)
            .await
            .map_err(TransportError::SendFailed)?;
        return Ok(());
    }

    let mtu = requested_mtu.clamp(MIN_MTU, endpoint.mtu);
    let new_conn = {
        let mut peers = endpoint
            .peers
            .lock()
            .map_err(|_| TransportError::Shutdown)?;
        if peers.contains_key(&addr) {
            // Our reply was lost; answer again without a second connection.
            None
        } else {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            peers.insert(addr, Peer::new(tx, mtu));
            Some(DatagramConnection::new(Arc::clone(endpoint), addr, mtu, rx, false))
        }
    };

    if let Some(conn) = new_conn {
        if accept_tx.try_send(conn).is_err() {
            tracing::warn!(%addr, "accept backlog full, refusing connection");
            endpoint.remove_peer(&addr);
            return Ok(());
        }
        tracing::debug!(%addr, mtu, "opened datagram connection");
    }

    let mut reply = vec![ID_OPEN_REPLY];
    reply.extend_from_slice(&endpoint.guid.to_be_bytes());
    reply.extend_from_slice(&mtu.to_be_bytes());
    endpoint
        .socket
        .send_to(&reply, addr)
        .await
        .map_err(TransportError::SendFailed)?;
    Ok(())
}

fn deliver_frame(endpoint: &Endpoint, frame: &[u8], addr: SocketAddr) {
    let Ok(mut peers) = endpoint.peers.lock() else {
        return;
    };
    let Some(peer) = peers.get_mut(&addr) else {
        tracing::trace!(%addr, "data frame from unknown peer");
        return;
    };

    let outcome = match peer.accept_frame(frame) {
        Ok(Some((seq, body))) => {
            if !peer.in_sequence(seq) {
                tracing::debug!(%addr, seq, "dropping stale packet");
                return;
            }
            peer.inbox.try_send(Ok(body))
        }
        Ok(None) => return,
        // A malformed frame is fatal for this peer only.
        Err(e) => peer.inbox.try_send(Err(e)),
    };

    match outcome {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(%addr, "peer inbox full, dropping packet");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            peers.remove(&addr);
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// A datagram [`Transport`] that accepts client connections on one socket.
pub struct DatagramTransport {
    endpoint: Arc<Endpoint>,
    accept_rx: mpsc::Receiver<DatagramConnection>,
    local_addr: SocketAddr,
}

impl DatagramTransport {
    /// Binds the transport and starts its socket pump.
    pub async fn bind(
        addr: &str,
        mtu: u16,
        query: Arc<dyn QueryHandler>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr = socket.local_addr().map_err(TransportError::AcceptFailed)?;
        let endpoint = Arc::new(Endpoint {
            socket,
            guid: rand::random(),
            mtu: mtu.max(MIN_MTU),
            peers: StdMutex::new(HashMap::new()),
            pump: StdMutex::new(None),
        });

        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let task = tokio::spawn(run_pump(
            Arc::clone(&endpoint),
            Role::Server { accept_tx, query },
        ));
        if let Ok(mut pump) = endpoint.pump.lock() {
            *pump = Some(task.abort_handle());
        }

        tracing::info!(%local_addr, "datagram transport listening");
        Ok(Self {
            endpoint,
            accept_rx,
            local_addr,
        })
    }

    /// Returns the local address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of peers with an open connection.
    pub fn peer_count(&self) -> usize {
        self.endpoint.peers.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Transport for DatagramTransport {
    type Connection = DatagramConnection;

    async fn accept(&mut self) -> Result<DatagramConnection, TransportError> {
        self.accept_rx.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.endpoint.stop_pump();
        let addrs: Vec<SocketAddr> = match self.endpoint.peers.lock() {
            Ok(mut peers) => peers.drain().map(|(addr, _)| addr).collect(),
            Err(_) => Vec::new(),
        };
        for addr in addrs {
            let _ = self.endpoint.socket.send_to(&[ID_DISCONNECT], addr).await;
        }
        tracing::info!(local_addr = %self.local_addr, "datagram transport shut down");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One peer of a datagram endpoint, on either the server or client side.
pub struct DatagramConnection {
    id: ConnectionId,
    peer: SocketAddr,
    mtu: u16,
    endpoint: Arc<Endpoint>,
    inbox: Mutex<mpsc::Receiver<Inbound>>,
    /// Next sequence number; held across the send so frames leave in order.
    send_seq: Mutex<u32>,
    next_split: AtomicU16,
    compression: Threshold,
    closed: AtomicBool,
    /// Client connections own their endpoint and stop its pump on close.
    owns_endpoint: bool,
}

impl DatagramConnection {
    fn new(
        endpoint: Arc<Endpoint>,
        peer: SocketAddr,
        mtu: u16,
        inbox: mpsc::Receiver<Inbound>,
        owns_endpoint: bool,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            mtu,
            endpoint,
            inbox: Mutex::new(inbox),
            send_seq: Mutex::new(0),
            next_split: AtomicU16::new(rand::random()),
            compression: Threshold::disabled(),
            closed: AtomicBool::new(false),
            owns_endpoint,
        }
    }

    /// The negotiated MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// The local address of the underlying socket.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.socket.local_addr()
    }

    fn encode_body(&self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Some(threshold) = self.compression.get() else {
            return Ok(data.to_vec());
        };
        let mut body = Vec::with_capacity(data.len() + 1);
        if data.len() >= threshold {
            body.push(MARKER_DEFLATE);
            body.extend(Compression::Deflate.compress(data)?);
        } else {
            body.push(MARKER_STORED);
            body.extend_from_slice(data);
        }
        Ok(body)
    }

    fn decode_body(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        if self.compression.get().is_none() {
            return Ok(body);
        }
        match body.first() {
            Some(&MARKER_STORED) | Some(&MARKER_NONE) => Ok(body[1..].to_vec()),
            Some(&MARKER_DEFLATE) => Compression::Deflate.decompress(&body[1..], MAX_INFLATED_LEN),
            Some(other) => Err(TransportError::MalformedFrame(format!(
                "unknown compression marker {other:#04x}"
            ))),
            None => Err(TransportError::MalformedFrame("empty packet".into())),
        }
    }
}

impl Connection for DatagramConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(format!(
                "{} already closed",
                self.id
            )));
        }
        let body = self.encode_body(data)?;
        let max_payload = (self.mtu as usize)
            .saturating_sub(FRAME_HEADER_LEN + UDP_OVERHEAD)
            .max(1);
        let mut send_seq = self.send_seq.lock().await;
        let seq = *send_seq;
        *send_seq = seq.wrapping_add(1);

        if body.len() <= max_payload {
            let frame = encode_frame(seq, 0, 0, 1, &body);
            self.endpoint
                .socket
                .send_to(&frame, self.peer)
                .await
                .map_err(TransportError::SendFailed)?;
            return Ok(());
        }

        let count = body.len().div_ceil(max_payload);
        if count > MAX_FRAGMENTS as usize {
            return Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("packet of {} bytes needs {count} fragments", body.len()),
            )));
        }
        let split_id = self.next_split.fetch_add(1, Ordering::Relaxed);
        for (index, chunk) in body.chunks(max_payload).enumerate() {
            let frame = encode_frame(seq, split_id, index as u16, count as u16, chunk);
            self.endpoint
                .socket
                .send_to(&frame, self.peer)
                .await
                .map_err(TransportError::SendFailed)?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let next = self.inbox.lock().await.recv().await;
        match next {
            Some(Ok(body)) => self.decode_body(body).map(Some),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let was_open = self.endpoint.remove_peer(&self.peer);
        if was_open {
            let _ = self.endpoint.socket.send_to(&[ID_DISCONNECT], self.peer).await;
        }
        if self.owns_endpoint {
            self.endpoint.stop_pump();
        }
        tracing::debug!(id = %self.id, peer = %self.peer, "datagram connection closed");
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn set_compression_threshold(&self, threshold: Option<usize>) {
        self.compression.set(threshold);
    }
}

impl Drop for DatagramConnection {
    fn drop(&mut self) {
        self.endpoint.remove_peer(&self.peer);
        if self.owns_endpoint {
            self.endpoint.stop_pump();
        }
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Client-side helpers: open a connection, or probe a server's status.
pub struct DatagramClient;

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

impl DatagramClient {
    /// Opens a connection to a datagram server.
    pub async fn connect(addr: SocketAddr) -> Result<DatagramConnection, TransportError> {
        Self::connect_with_mtu(addr, DEFAULT_MTU).await
    }

    /// Opens a connection asking for a specific MTU.
    pub async fn connect_with_mtu(
        addr: SocketAddr,
        mtu: u16,
    ) -> Result<DatagramConnection, TransportError> {
        let socket = UdpSocket::bind(unspecified_for(addr))
            .await
            .map_err(TransportError::ConnectFailed)?;

        let mut request = vec![ID_OPEN_REQUEST, TRANSPORT_VERSION];
        request.extend_from_slice(&mtu.to_be_bytes());

        let mut buf = vec![0u8; MAX_DATAGRAM];
        for attempt in 1..=OPEN_ATTEMPTS {
            socket
                .send_to(&request, addr)
                .await
                .map_err(TransportError::ConnectFailed)?;

            let reply = tokio::time::timeout(OPEN_RETRY, socket.recv_from(&mut buf)).await;
            let (len, from) = match reply {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => return Err(TransportError::ConnectFailed(e)),
                Err(_) => {
                    tracing::debug!(%addr, attempt, "open request timed out, retrying");
                    continue;
                }
            };
            if from != addr || len == 0 {
                continue;
            }

            let mut r = Reader::new(&buf[..len]);
            match r.u8()? {
                ID_OPEN_REPLY => {
                    let guid = r.u64()?;
                    let mtu = r.u16()?;
                    return Ok(Self::open(socket, addr, guid, mtu));
                }
                ID_INCOMPATIBLE => {
                    let theirs = r.u8()?;
                    return Err(TransportError::ConnectFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        format!(
                            "server speaks transport version {theirs}, we speak {TRANSPORT_VERSION}"
                        ),
                    )));
                }
                _ => continue,
            }
        }

        Err(TransportError::Timeout(format!("no open reply from {addr}")))
    }

    fn open(socket: UdpSocket, addr: SocketAddr, guid: u64, mtu: u16) -> DatagramConnection {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let endpoint = Arc::new(Endpoint {
            socket,
            guid,
            mtu,
            peers: StdMutex::new(HashMap::from([(addr, Peer::new(tx, mtu))])),
            pump: StdMutex::new(None),
        });
        let task = tokio::spawn(run_pump(Arc::clone(&endpoint), Role::Client));
        if let Ok(mut pump) = endpoint.pump.lock() {
            *pump = Some(task.abort_handle());
        }
        DatagramConnection::new(endpoint, addr, mtu, rx, true)
    }

    /// Sends one discovery probe and returns the server's advertisement.
    pub async fn ping(addr: SocketAddr, timeout: Duration) -> Result<String, TransportError> {
        let socket = UdpSocket::bind(unspecified_for(addr))
            .await
            .map_err(TransportError::ConnectFailed)?;
        let ping_time: u64 = rand::random();
        socket
            .send_to(&encode_ping(ping_time, rand::random()), addr)
            .await
            .map_err(TransportError::SendFailed)?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let wait = async {
            loop {
                let (len, from) = socket
                    .recv_from(&mut buf)
                    .await
                    .map_err(TransportError::ReceiveFailed)?;
                if from != addr {
                    continue;
                }
                let mut r = Reader::new(&buf[..len]);
                if r.u8()? != ID_UNCONNECTED_PONG || r.u64()? != ping_time {
                    continue;
                }
                let _server_guid = r.u64()?;
                let len = r.u16()? as usize;
                let text = r.take(len)?;
                return String::from_utf8(text.to_vec())
                    .map_err(|e| TransportError::MalformedFrame(e.to_string()));
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::Timeout(format!("no pong from {addr}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        let (tx, _rx) = mpsc::channel(4);
        Peer::new(tx, DEFAULT_MTU)
    }

    fn frame_body(seq: u32, split_id: u16, index: u16, count: u16, payload: &[u8]) -> Vec<u8> {
        // Peer::accept_frame expects the frame without its id byte.
        encode_frame(seq, split_id, index, count, payload)[1..].to_vec()
    }

    #[test]
    fn test_accept_frame_single_fragment_is_complete() {
        let mut p = peer();
        let got = p.accept_frame(&frame_body(3, 0, 0, 1, b"hello")).unwrap();
        assert_eq!(got, Some((3, b"hello".to_vec())));
    }

    #[test]
    fn test_accept_frame_reassembles_out_of_order_fragments() {
        let mut p = peer();
        assert_eq!(p.accept_frame(&frame_body(9, 7, 2, 3, b"c")).unwrap(), None);
        assert_eq!(p.accept_frame(&frame_body(9, 7, 0, 3, b"a")).unwrap(), None);
        let got = p.accept_frame(&frame_body(9, 7, 1, 3, b"b")).unwrap();
        assert_eq!(got, Some((9, b"abc".to_vec())));
        assert!(p.splits.is_empty());
    }

    #[test]
    fn test_accept_frame_duplicate_fragment_counts_once() {
        let mut p = peer();
        p.accept_frame(&frame_body(1, 5, 0, 2, b"x")).unwrap();
        assert_eq!(p.accept_frame(&frame_body(1, 5, 0, 2, b"x")).unwrap(), None);
        let got = p.accept_frame(&frame_body(1, 5, 1, 2, b"y")).unwrap();
        assert_eq!(got, Some((1, b"xy".to_vec())));
    }

    #[test]
    fn test_accept_frame_index_past_count_is_malformed() {
        let mut p = peer();
        let err = p.accept_frame(&frame_body(1, 1, 4, 2, b"x")).unwrap_err();
        assert!(matches!(err, TransportError::MalformedFrame(_)));
    }

    #[test]
    fn test_accept_frame_truncated_header_is_malformed() {
        let mut p = peer();
        assert!(p.accept_frame(&[0, 0, 1]).is_err());
    }

    #[test]
    fn test_accept_frame_evicts_splits_behind_delivered_packets() {
        let mut p = peer();
        for seq in 0..MAX_PENDING_SPLITS as u32 {
            let got = p.accept_frame(&frame_body(seq, seq as u16, 0, 2, b"a")).unwrap();
            assert_eq!(got, None);
        }
        assert_eq!(p.splits.len(), MAX_PENDING_SPLITS);

        let first = MAX_PENDING_SPLITS as u32;
        for seq in first..first + 6 {
            let (got, _) = p.accept_frame(&frame_body(seq, 0, 0, 1, b"x")).unwrap().unwrap();
            assert!(p.in_sequence(got));
        }

        let fresh = first + 6;
        assert_eq!(p.accept_frame(&frame_body(fresh, 900, 0, 2, b"a")).unwrap(), None);
        let got = p.accept_frame(&frame_body(fresh, 900, 1, 2, b"b")).unwrap();
        assert_eq!(got, Some((fresh, b"ab".to_vec())));
        assert!(p.splits.is_empty());
    }

    #[test]
    fn test_accept_frame_evicts_splits_outside_window() {
        let mut p = peer();
        p.accept_frame(&frame_body(0, 1, 0, 2, b"a")).unwrap();
        p.accept_frame(&frame_body(SPLIT_SEQ_WINDOW + 1, 2, 0, 2, b"a")).unwrap();
        assert_eq!(p.splits.len(), 1);
        assert!(p.splits.contains_key(&2));
    }

    #[test]
    fn test_in_sequence_drops_stale_packets() {
        let mut p = peer();
        assert!(p.in_sequence(0));
        assert!(p.in_sequence(2));
        assert!(!p.in_sequence(1));
        assert!(!p.in_sequence(2));
        assert!(p.in_sequence(3));
    }

    #[test]
    fn test_pong_layout_carries_advertisement() {
        let pong = encode_pong(42, 7, "MCPE;hi;");
        let mut r = Reader::new(&pong);
        assert_eq!(r.u8().unwrap(), ID_UNCONNECTED_PONG);
        assert_eq!(r.u64().unwrap(), 42);
        assert_eq!(r.u64().unwrap(), 7);
        let len = r.u16().unwrap() as usize;
        assert_eq!(r.take(len).unwrap(), b"MCPE;hi;");
    }
}
