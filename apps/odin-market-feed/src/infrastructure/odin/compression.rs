//! Payload Compression
//!
//! zlib inflate/deflate for packet bodies. Whether a body is compressed is
//! decided by the packet marker; the session compression flag only controls
//! how outbound control messages are framed.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::codec::DecodeError;
use super::framing::{Packet, PayloadEncoding};

/// Upper bound on an inflated body.
pub const DEFAULT_MAX_INFLATED_LEN: usize = 16 * 1024 * 1024;

/// Session compression setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Outbound bodies are zlib-compressed.
    #[default]
    On,
    /// Outbound bodies are sent raw.
    Off,
}

impl Compression {
    /// Build from a boolean flag.
    #[must_use]
    pub const fn from_enabled(enabled: bool) -> Self {
        if enabled { Self::On } else { Self::Off }
    }

    /// Whether compression is enabled.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Compress bytes into a zlib stream at the default level.
///
/// # Errors
///
/// Returns an I/O error from the encoder.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflates packet bodies.
#[derive(Debug, Clone, Copy)]
pub struct Decompressor {
    max_inflated_len: usize,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INFLATED_LEN)
    }
}

impl Decompressor {
    /// Create a decompressor with an inflated size limit.
    #[must_use]
    pub const fn new(max_inflated_len: usize) -> Self {
        Self { max_inflated_len }
    }

    /// Return the raw body of a packet, inflating it when it is flagged as zlib.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::CorruptPayload`] if the zlib stream is malformed
    /// or inflates past the size limit.
    pub fn decompress(&self, packet: &Packet) -> Result<Vec<u8>, DecodeError> {
        match packet.encoding {
            PayloadEncoding::Raw => Ok(packet.body.clone()),
            PayloadEncoding::Zlib => self.inflate(&packet.body),
        }
    }

    /// Inflate a zlib stream.
    ///
    /// # Errors
    ///
    /// See [`Decompressor::decompress`].
    pub fn inflate(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let limit = u64::try_from(self.max_inflated_len)
            .unwrap_or(u64::MAX)
            .saturating_add(1);

        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|e| DecodeError::CorruptPayload(e.to_string()))?;

        if out.len() > self.max_inflated_len {
            return Err(DecodeError::CorruptPayload(format!(
                "inflated body exceeds {} bytes",
                self.max_inflated_len
            )));
        }

        Ok(out)
    }
}
