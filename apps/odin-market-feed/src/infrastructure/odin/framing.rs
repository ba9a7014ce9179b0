//! Packet Framing
//!
//! The feed server writes a byte stream of length-prefixed packets across
//! WebSocket binary frames. Packet boundaries carry no relation to frame
//! boundaries, so inbound bytes are accumulated here until whole packets are
//! available.
//!
//! # Packet Layout
//!
//! ```text
//! +--------+----------------------+------------------+
//! | marker | length (5 ASCII dec) | body (length B)  |
//! | 1 byte | 5 bytes, zero padded | 0..=99999 bytes  |
//! +--------+----------------------+------------------+
//! ```
//!
//! Marker `0x05` means the body is zlib-compressed, `0x02` means raw.

use std::fmt;

use serde::Serialize;

use super::compression::{self, Compression};

// =============================================================================
// Constants
// =============================================================================

/// Size of the packet header (marker plus length digits).
pub const PACKET_HEADER_LEN: usize = 6;

/// Number of ASCII digits in the length field.
pub const LENGTH_DIGITS: usize = 5;

/// Largest body the five-digit length field can describe.
pub const MAX_BODY_LEN: usize = 99_999;

/// Marker byte for zlib-compressed bodies.
pub const MARKER_ZLIB: u8 = 0x05;

/// Marker byte for raw bodies.
pub const MARKER_RAW: u8 = 0x02;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised while framing or unframing packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Header started with a byte that is not a known packet marker.
    #[error("unknown packet marker 0x{0:02x}")]
    UnknownMarker(u8),

    /// Length field was not five ASCII digits.
    #[error("invalid packet length field {0:?}")]
    InvalidLength(String),

    /// Outbound body does not fit the five-digit length field.
    #[error("packet body of {0} bytes exceeds the {MAX_BODY_LEN} byte limit")]
    BodyTooLarge(usize),

    /// Outbound body could not be compressed.
    #[error("failed to compress packet body: {0}")]
    Compression(String),
}

// =============================================================================
// Packet
// =============================================================================

/// How a packet body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// zlib stream.
    Zlib,
    /// Uncompressed bytes.
    Raw,
}

impl PayloadEncoding {
    /// Resolve a header marker byte.
    #[must_use]
    pub const fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            MARKER_ZLIB => Some(Self::Zlib),
            MARKER_RAW => Some(Self::Raw),
            _ => None,
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zlib => "zlib",
            Self::Raw => "raw",
        }
    }

    /// Header marker byte for this encoding.
    #[must_use]
    pub const fn marker(self) -> u8 {
        match self {
            Self::Zlib => MARKER_ZLIB,
            Self::Raw => MARKER_RAW,
        }
    }
}

/// One complete packet taken off the stream.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Body encoding announced by the header.
    pub encoding: PayloadEncoding,
    /// Body bytes, still compressed when `encoding` is `Zlib`.
    pub body: Vec<u8>,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("encoding", &self.encoding)
            .field("len", &self.body.len())
            .finish()
    }
}

/// Parse a run of ASCII decimal digits.
///
/// Returns `None` unless every byte is a digit.
pub(crate) fn parse_ascii_len(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    Some(
        digits
            .iter()
            .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0')),
    )
}

/// Write a packet header and body.
///
/// # Errors
///
/// Returns [`FramingError::BodyTooLarge`] when the body exceeds [`MAX_BODY_LEN`].
pub fn encode_packet(encoding: PayloadEncoding, body: &[u8]) -> Result<Vec<u8>, FramingError> {
    if body.len() > MAX_BODY_LEN {
        return Err(FramingError::BodyTooLarge(body.len()));
    }

    let mut packet = Vec::with_capacity(PACKET_HEADER_LEN + body.len());
    packet.push(encoding.marker());
    packet.extend_from_slice(format!("{:05}", body.len()).as_bytes());
    packet.extend_from_slice(body);
    Ok(packet)
}

/// Frame an outbound message, compressing it when compression is on.
///
/// # Errors
///
/// Returns an error if compression fails or the body is too large to frame.
pub fn frame_outbound(payload: &[u8], compression: Compression) -> Result<Vec<u8>, FramingError> {
    match compression {
        Compression::On => {
            let body = compression::compress(payload)
                .map_err(|e| FramingError::Compression(e.to_string()))?;
            encode_packet(PayloadEncoding::Zlib, &body)
        }
        Compression::Off => encode_packet(PayloadEncoding::Raw, payload),
    }
}

// =============================================================================
// Reassembler
// =============================================================================

/// What to do when bytes at a packet boundary are not a valid header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GarbagePolicy {
    /// Report a protocol violation.
    #[default]
    Strict,
    /// Skip one byte and look for the next header.
    Resync,
}

impl GarbagePolicy {
    /// Parse policy from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "resync" => Self::Resync,
            _ => Self::Strict,
        }
    }
}

/// Accumulates transport frames until whole packets are available.
///
/// At most one packet is ever partially buffered: bytes are consumed strictly
/// in arrival order and every complete packet is released before the next
/// header is read.
///
/// # Example
///
/// ```rust
/// use odin_market_feed::infrastructure::odin::framing::{
///     encode_packet, GarbagePolicy, PayloadEncoding, Reassembler,
/// };
///
/// let packet = encode_packet(PayloadEncoding::Raw, b"hello").unwrap();
/// let mut reassembler = Reassembler::new(GarbagePolicy::Strict);
///
/// assert!(reassembler.feed(&packet[..4]).unwrap().is_empty());
/// let done = reassembler.feed(&packet[4..]).unwrap();
/// assert_eq!(done[0].body, b"hello");
/// ```
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    start: usize,
    policy: GarbagePolicy,
    skipped_bytes: u64,
}

impl Reassembler {
    /// Create an empty reassembler.
    #[must_use]
    pub const fn new(policy: GarbagePolicy) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            policy,
            skipped_bytes: 0,
        }
    }

    /// Append one transport frame.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete packet, if one is buffered.
    ///
    /// # Errors
    ///
    /// Under [`GarbagePolicy::Strict`], returns an error when the bytes at the
    /// packet boundary are not a valid header. The buffer is discarded.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, FramingError> {
        loop {
            let pending = &self.buffer[self.start..];
            if pending.len() < PACKET_HEADER_LEN {
                return Ok(None);
            }

            let header = match Self::parse_header(&pending[..PACKET_HEADER_LEN]) {
                Ok(header) => header,
                Err(e) => match self.policy {
                    GarbagePolicy::Strict => {
                        self.reset();
                        return Err(e);
                    }
                    GarbagePolicy::Resync => {
                        tracing::warn!(error = %e, "Skipping byte while resynchronising packet stream");
                        self.start += 1;
                        self.skipped_bytes += 1;
                        continue;
                    }
                },
            };

            let (encoding, body_len) = header;
            let total = PACKET_HEADER_LEN + body_len;
            if pending.len() < total {
                return Ok(None);
            }

            let body = pending[PACKET_HEADER_LEN..total].to_vec();
            self.start += total;

            tracing::trace!(len = body_len, ?encoding, "Packet reassembled");
            return Ok(Some(Packet { encoding, body }));
        }
    }

    /// Append a frame and take every packet it completes.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::next_packet`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Packet>, FramingError> {
        self.push(chunk);

        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Whether a packet is partially buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buffered_len() > 0
    }

    /// Number of buffered bytes not yet released as packets.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Bytes discarded while resynchronising.
    #[must_use]
    pub const fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Discard any partial packet.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.start = 0;
    }

    fn parse_header(header: &[u8]) -> Result<(PayloadEncoding, usize), FramingError> {
        let encoding =
            PayloadEncoding::from_marker(header[0]).ok_or(FramingError::UnknownMarker(header[0]))?;

        let digits = &header[1..=LENGTH_DIGITS];
        let len = parse_ascii_len(digits).ok_or_else(|| {
            FramingError::InvalidLength(String::from_utf8_lossy(digits).into_owned())
        })?;

        Ok((encoding, len))
    }
}

// =============================================================================
// Tests
// =============================================================================
