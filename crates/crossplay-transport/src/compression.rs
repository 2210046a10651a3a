//! Packet body compression shared by both transports.
//!
//! The backend-facing stream wraps bodies in zlib, the client-facing
//! datagram link uses raw deflate. Both decide per packet by comparing the
//! body length against a threshold that is negotiated at runtime, so the
//! threshold lives in an atomic that reader and writer halves share.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::TransportError;

/// Hard cap on an inflated body, to refuse decompression bombs.
pub(crate) const MAX_INFLATED_LEN: usize = 2 * 1024 * 1024;

/// A compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// zlib-wrapped deflate (RFC 1950).
    Zlib,
    /// Raw deflate without header or checksum (RFC 1951).
    Deflate,
}

impl Compression {
    /// Compresses `data` with this algorithm.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let level = flate2::Compression::default();
        let out = match self {
            Self::Zlib => {
                let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), level);
                enc.write_all(data).map_err(TransportError::Compression)?;
                enc.finish()
            }
            Self::Deflate => {
                let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), level);
                enc.write_all(data).map_err(TransportError::Compression)?;
                enc.finish()
            }
        };
        out.map_err(TransportError::Compression)
    }

    /// Inflates `data`, refusing output longer than `limit` bytes.
    pub fn decompress(self, data: &[u8], limit: usize) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        // Read one byte past the limit so an oversized body is detectable.
        let cap = limit as u64 + 1;
        let read = match self {
            Self::Zlib => flate2::read::ZlibDecoder::new(data)
                .take(cap)
                .read_to_end(&mut out),
            Self::Deflate => flate2::read::DeflateDecoder::new(data)
                .take(cap)
                .read_to_end(&mut out),
        };
        read.map_err(TransportError::Compression)?;
        if out.len() > limit {
            return Err(TransportError::MalformedFrame(format!(
                "inflated body exceeds {limit} bytes"
            )));
        }
        Ok(out)
    }
}

/// A compression threshold that can be flipped while both halves of a
/// connection are in use. Negative means disabled.
#[derive(Debug)]
pub(crate) struct Threshold(AtomicI64);

impl Threshold {
    pub(crate) fn disabled() -> Self {
        Self(AtomicI64::new(-1))
    }

    pub(crate) fn get(&self) -> Option<usize> {
        let raw = self.0.load(Ordering::Acquire);
        usize::try_from(raw).ok()
    }

    pub(crate) fn set(&self, threshold: Option<usize>) {
        let raw = threshold.map_or(-1, |t| t.min(i64::MAX as usize) as i64);
        self.0.store(raw, Ordering::Release);
    }
}
