//! Stream transport for the backend-facing edition.
//!
//! Every packet travels as `[VarInt length][body]`. Once a compression
//! threshold is negotiated the body becomes `[VarInt data_length][data]`,
//! where `data_length` is zero for bodies sent as-is and the inflated size
//! for zlib-compressed ones.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::compression::{MAX_INFLATED_LEN, Threshold};
use crate::{Compression, Connection, ConnectionId, Transport, TransportError};

/// Largest frame either side may send.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

const MAX_VARINT_LEN: usize = 5;

/// Appends `value` as a VarInt.
pub fn put_varint(dst: &mut impl BufMut, value: u32) {
    let mut v = value;
    loop {
        if v & !0x7f == 0 {
            dst.put_u8(v as u8);
            return;
        }
        dst.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
}

/// Reads a VarInt from the front of `src` without consuming it.
///
/// Returns the value and its encoded width, or `None` if more bytes are
/// needed.
pub fn peek_varint(src: &[u8]) -> Result<Option<(u32, usize)>, TransportError> {
    let mut value: u32 = 0;
    for (i, byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if src.len() >= MAX_VARINT_LEN {
        return Err(TransportError::MalformedFrame("VarInt too long".into()));
    }
    Ok(None)
}

/// Length-prefixed frame codec with optional zlib bodies.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    threshold: Arc<Threshold>,
}

impl FrameCodec {
    fn new(threshold: Arc<Threshold>) -> Self {
        Self { threshold }
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, TransportError> {
        let Some((len, width)) = peek_varint(src)? else {
            return Ok(None);
        };
        let len = len as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::MalformedFrame(format!(
                "frame of {len} bytes exceeds {MAX_FRAME_LEN}"
            )));
        }
        if src.len() < width + len {
            src.reserve(width + len - src.len());
            return Ok(None);
        }
        src.advance(width);
        let frame = src.split_to(len);

        if self.threshold.get().is_none() {
            return Ok(Some(frame.to_vec()));
        }

        let Some((data_len, width)) = peek_varint(&frame)? else {
            return Err(TransportError::MalformedFrame(
                "compressed frame missing data length".into(),
            ));
        };
        let body = &frame[width..];
        if data_len == 0 {
            return Ok(Some(body.to_vec()));
        }
        let data_len = data_len as usize;
        if data_len > MAX_INFLATED_LEN {
            return Err(TransportError::MalformedFrame(format!(
                "declared size {data_len} exceeds {MAX_INFLATED_LEN}"
            )));
        }
        let inflated = Compression::Zlib.decompress(body, data_len)?;
        if inflated.len() != data_len {
            return Err(TransportError::MalformedFrame(format!(
                "declared size {data_len}, inflated {}",
                inflated.len()
            )));
        }
        Ok(Some(inflated))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), TransportError> {
        let body = match self.threshold.get() {
            None => item.to_vec(),
            Some(threshold) => {
                let mut body = Vec::with_capacity(item.len() + MAX_VARINT_LEN);
                if item.len() >= threshold {
                    put_varint(&mut body, item.len() as u32);
                    body.extend(Compression::Zlib.compress(item)?);
                } else {
                    put_varint(&mut body, 0);
                    body.extend_from_slice(item);
                }
                body
            }
        };
        if body.len() > MAX_FRAME_LEN {
            return Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", body.len()),
            )));
        }
        dst.reserve(body.len() + MAX_VARINT_LEN);
        put_varint(dst, body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

/// A TCP connection carrying length-prefixed frames.
pub struct StreamConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<FramedRead<OwnedReadHalf, FrameCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>,
    threshold: Arc<Threshold>,
    closed: watch::Sender<bool>,
    shut: AtomicBool,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("compression_threshold", &self.threshold.get())
            .field("closed", &self.shut.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Wraps an established TCP stream.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr().map_err(TransportError::ConnectFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not disable Nagle");
        }
        let threshold = Arc::new(Threshold::disabled());
        let (read, write) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            id: ConnectionId::next(),
            peer,
            reader: Mutex::new(FramedRead::new(read, FrameCodec::new(Arc::clone(&threshold)))),
            writer: Mutex::new(FramedWrite::new(write, FrameCodec::new(Arc::clone(&threshold)))),
            threshold,
            closed,
            shut: AtomicBool::new(false),
        })
    }

    /// Connects to a stream server.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        Self::new(stream)
    }

    /// Returns the current compression threshold.
    pub fn compression_threshold(&self) -> Option<usize> {
        self.threshold.get()
    }
}

impl Connection for StreamConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.shut.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(format!(
                "{} already closed",
                self.id
            )));
        }
        let mut writer = self.writer.lock().await;
        writer.send(data).await.map_err(|e| match e {
            TransportError::ReceiveFailed(io) => TransportError::SendFailed(io),
            other => other,
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Ok(None),
            frame = reader.next() => frame.transpose(),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.shut.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.send_replace(true);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            tracing::debug!(id = %self.id, error = %e, "stream shutdown failed");
        }
        tracing::debug!(id = %self.id, peer = %self.peer, "stream connection closed");
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn set_compression_threshold(&self, threshold: Option<usize>) {
        self.threshold.set(threshold);
    }
}

/// A TCP listener producing [`StreamConnection`]s.
pub struct StreamTransport {
    listener: TcpListener,
    shutdown: watch::Sender<bool>,
}

impl StreamTransport {
    /// Binds a listener on `addr`.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let (shutdown, _) = watch::channel(false);
        if let Ok(local_addr) = listener.local_addr() {
            tracing::info!(%local_addr, "stream transport listening");
        }
        Ok(Self { listener, shutdown })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::AcceptFailed)
    }
}

impl Transport for StreamTransport {
    type Connection = StreamConnection;

    async fn accept(&mut self) -> Result<StreamConnection, TransportError> {
        let mut stop = self.shutdown.subscribe();
        if *stop.borrow() {
            return Err(TransportError::Shutdown);
        }
        tokio::select! {
            _ = stop.wait_for(|s| *s) => Err(TransportError::Shutdown),
            accepted = self.listener.accept() => {
                let (stream, addr) = accepted.map_err(TransportError::AcceptFailed)?;
                tracing::debug!(%addr, "accepted stream connection");
                StreamConnection::new(stream)
            }
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.shutdown.send_replace(true);
        Ok(())
    }
}
