//! Record Codec
//!
//! Decodes inflated packet bodies into [`MarketRecord`]s.
//!
//! # Design
//!
//! A body holds one or more inner messages, each behind the same six byte
//! header as a packet. Each inner message is text (`tag=value|...`), optionally
//! followed by `|50=` and a little-endian binary block. The message code
//! (tag 64) selects the layout:
//!
//! - `206` / `347` with a block: batch of 64 byte touchline records
//! - `127` with a block: batch of 136 byte best-five records
//! - `206` / `347` without a block but with tags 1, 7 and 8: text touchline
//! - any other control code without a block: acknowledgement
//! - anything else: [`MarketRecord::Unknown`]
//!
//! A block whose length is not a whole number of records is malformed.

use chrono::NaiveDateTime;

use super::framing::{PACKET_HEADER_LEN, parse_ascii_len};
use super::messages::{BINARY_BLOCK_MARKER, FIELD_SEPARATOR, code, tag};
use crate::domain::streaming::{
    Ack, AckStatus, DEPTH_LEVELS, Depth, DepthLevel, MarketRecord, Scrip, Touchline,
    exchange_time,
};
use crate::domain::subscription::SubscriptionMode;

// =============================================================================
// Constants
// =============================================================================

/// Size of one binary touchline record.
pub const TOUCHLINE_RECORD_LEN: usize = 64;

/// Size of one binary best-five record.
pub const DEPTH_RECORD_LEN: usize = 136;

/// Time format of text touchline tags 73 and 74.
const TEXT_TIME_FORMAT: &str = "%Y-%m-%d %H%M%S";

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised while turning a packet body into records.
///
/// Both variants are recoverable: the offending message is dropped and the
/// session continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Compressed stream could not be inflated.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// Message did not match its declared layout.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

impl DecodeError {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CorruptPayload(_) => "corrupt_payload",
            Self::MalformedRecord(_) => "malformed_record",
        }
    }
}

fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::MalformedRecord(msg.into())
}

// =============================================================================
// Envelope Splitting
// =============================================================================

/// Split an inflated body into its inner messages.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedRecord`] if an inner header is truncated,
/// non-numeric, or declares more bytes than remain.
pub fn split_messages(body: &[u8]) -> Result<Vec<&[u8]>, DecodeError> {
    let mut messages = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        if rest.len() < PACKET_HEADER_LEN {
            return Err(malformed(format!(
                "truncated message header ({} bytes)",
                rest.len()
            )));
        }

        let len = parse_ascii_len(&rest[1..PACKET_HEADER_LEN]).ok_or_else(|| {
            malformed(format!(
                "non-numeric message length {:?}",
                String::from_utf8_lossy(&rest[1..PACKET_HEADER_LEN])
            ))
        })?;

        let end = PACKET_HEADER_LEN + len;
        if rest.len() < end {
            return Err(malformed(format!(
                "message declares {len} bytes, {} remain",
                rest.len() - PACKET_HEADER_LEN
            )));
        }

        messages.push(&rest[PACKET_HEADER_LEN..end]);
        rest = &rest[end..];
    }

    Ok(messages)
}

// =============================================================================
// Text Fields
// =============================================================================

/// Parsed `tag=value` fields of one message.
#[derive(Debug, Default)]
struct Fields<'a> {
    pairs: Vec<(u32, &'a str)>,
}

impl<'a> Fields<'a> {
    fn parse(text: &'a str) -> Result<Self, DecodeError> {
        let mut pairs = Vec::new();

        for field in text.split(FIELD_SEPARATOR).filter(|f| !f.is_empty()) {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| malformed(format!("field without '=': {field:?}")))?;
            let key = key
                .trim()
                .parse()
                .map_err(|_| malformed(format!("non-numeric tag: {key:?}")))?;
            pairs.push((key, value));
        }

        Ok(Self { pairs })
    }

    fn get(&self, tag: u32) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn has(&self, tag: u32) -> bool {
        self.get(tag).is_some()
    }

    fn parse_opt<T: std::str::FromStr>(&self, tag: u32) -> Result<Option<T>, DecodeError> {
        self.get(tag)
            .map(|v| {
                v.parse()
                    .map_err(|_| malformed(format!("tag {tag} has invalid value {v:?}")))
            })
            .transpose()
    }

    fn u32_or_zero(&self, tag: u32) -> Result<u32, DecodeError> {
        Ok(self.parse_opt(tag)?.unwrap_or(0))
    }

    fn required_u32(&self, tag: u32) -> Result<u32, DecodeError> {
        self.parse_opt(tag)?
            .ok_or_else(|| malformed(format!("missing tag {tag}")))
    }

    fn time(&self, tag: u32) -> Result<Option<NaiveDateTime>, DecodeError> {
        self.get(tag)
            .map(|v| {
                NaiveDateTime::parse_from_str(v, TEXT_TIME_FORMAT)
                    .map_err(|e| malformed(format!("tag {tag} time {v:?}: {e}")))
            })
            .transpose()
    }
}

// =============================================================================
// Binary Reader
// =============================================================================

/// Little-endian cursor over a binary record.
struct LeReader<'a> {
    buf: &'a [u8],
}

impl<'a> LeReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take4(&mut self) -> Result<[u8; 4], DecodeError> {
        let (head, rest) = self
            .buf
            .split_first_chunk::<4>()
            .ok_or_else(|| malformed("binary record truncated"))?;
        self.buf = rest;
        Ok(*head)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.take4().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.take4().map(i32::from_le_bytes)
    }

    fn time(&mut self) -> Result<NaiveDateTime, DecodeError> {
        let seconds = self.i32()?;
        exchange_time(seconds).ok_or_else(|| malformed(format!("time {seconds} out of range")))
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Stateless decoder from inflated bodies to market records.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordDecoder;

impl RecordDecoder {
    /// Create a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode every message in an inflated body, in order.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedRecord`] if any message is malformed.
    pub fn decode(&self, body: &[u8]) -> Result<Vec<MarketRecord>, DecodeError> {
        let mut records = Vec::new();
        for message in split_messages(body)? {
            records.extend(self.decode_message(message)?);
        }
        Ok(records)
    }

    /// Decode a single inner message.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedRecord`] if the text part is not UTF-8,
    /// the message code is missing, or a binary block does not fit its layout.
    pub fn decode_message(&self, message: &[u8]) -> Result<Vec<MarketRecord>, DecodeError> {
        let (text, block) = match find_block(message) {
            Some(pos) => (&message[..pos], Some(&message[pos + BINARY_BLOCK_MARKER.len()..])),
            None => (message, None),
        };

        let text = std::str::from_utf8(text)
            .map_err(|e| malformed(format!("message text is not UTF-8: {e}")))?;
        let fields = Fields::parse(text)?;
        let message_code: u32 = fields.required_u32(tag::MESSAGE_CODE)?;

        match (message_code, block) {
            (code::TOUCHLINE | code::LTP_TOUCHLINE, Some(block)) => {
                decode_touchline_block(block, touchline_mode(message_code))
            }
            (code::BEST_FIVE, Some(block)) => decode_depth_block(block),
            (code::TOUCHLINE | code::LTP_TOUCHLINE, None)
                if fields.has(tag::SEGMENT) && fields.has(tag::TOKEN) && fields.has(tag::LTP) =>
            {
                Ok(vec![decode_text_touchline(&fields, touchline_mode(message_code))?])
            }
            (code::LOGIN | code::PAUSE_RESUME | code::BEST_FIVE | code::TOUCHLINE | code::LTP_TOUCHLINE, None) => {
                Ok(vec![MarketRecord::Ack(decode_ack(&fields, message_code)?)])
            }
            _ => Ok(vec![MarketRecord::Unknown {
                message_code,
                raw: message.to_vec(),
            }]),
        }
    }
}

fn find_block(message: &[u8]) -> Option<usize> {
    message
        .windows(BINARY_BLOCK_MARKER.len())
        .position(|w| w == BINARY_BLOCK_MARKER)
}

const fn touchline_mode(message_code: u32) -> SubscriptionMode {
    if message_code == code::LTP_TOUCHLINE {
        SubscriptionMode::Ltp
    } else {
        SubscriptionMode::Touchline
    }
}

fn check_batch(block: &[u8], record_len: usize, what: &str) -> Result<(), DecodeError> {
    if block.len() % record_len == 0 {
        Ok(())
    } else {
        Err(malformed(format!(
            "{what} block of {} bytes is not a multiple of {record_len}",
            block.len()
        )))
    }
}

fn decode_touchline_block(
    block: &[u8],
    mode: SubscriptionMode,
) -> Result<Vec<MarketRecord>, DecodeError> {
    check_batch(block, TOUCHLINE_RECORD_LEN, "touchline")?;

    block
        .chunks_exact(TOUCHLINE_RECORD_LEN)
        .map(|chunk| {
            let mut r = LeReader::new(chunk);
            Ok(MarketRecord::Touchline(Touchline {
                scrip: Scrip::new(r.u32()?, r.u32()?),
                mode,
                last_update_time: r.time()?,
                last_trade_time: r.time()?,
                ltp: r.u32()?,
                buy_quantity: r.u32()?,
                buy_price: r.u32()?,
                sell_quantity: r.u32()?,
                sell_price: r.u32()?,
                open: r.u32()?,
                high: r.u32()?,
                low: r.u32()?,
                close: r.u32()?,
                decimal_locator: r.u32()?,
                previous_close: r.u32()?,
                indicative_close: r.u32()?,
            }))
        })
        .collect()
}

fn decode_depth_block(block: &[u8]) -> Result<Vec<MarketRecord>, DecodeError> {
    check_batch(block, DEPTH_RECORD_LEN, "best five")?;

    block
        .chunks_exact(DEPTH_RECORD_LEN)
        .map(|chunk| {
            let mut r = LeReader::new(chunk);
            let scrip = Scrip::new(r.u32()?, r.u32()?);
            let last_update_time = r.time()?;

            let mut bids = [DepthLevel::default(); DEPTH_LEVELS];
            let mut asks = [DepthLevel::default(); DEPTH_LEVELS];
            for level in bids.iter_mut().chain(asks.iter_mut()) {
                *level = DepthLevel {
                    price: r.u32()?,
                    quantity: r.u32()?,
                    orders: r.u32()?,
                };
            }

            Ok(MarketRecord::Depth(Depth {
                scrip,
                last_update_time,
                bids,
                asks,
                decimal_locator: r.u32()?,
            }))
        })
        .collect()
}

/// Text touchlines without a time tag are stamped with the exchange origin.
fn decode_text_touchline(
    fields: &Fields<'_>,
    mode: SubscriptionMode,
) -> Result<MarketRecord, DecodeError> {
    let origin = exchange_time(0).ok_or_else(|| malformed("exchange origin out of range"))?;

    Ok(MarketRecord::Touchline(Touchline {
        scrip: Scrip::new(
            fields.required_u32(tag::SEGMENT)?,
            fields.required_u32(tag::TOKEN)?,
        ),
        mode,
        last_update_time: fields.time(tag::LAST_UPDATE_TIME)?.unwrap_or(origin),
        last_trade_time: fields.time(tag::LAST_TRADE_TIME)?.unwrap_or(origin),
        ltp: fields.required_u32(tag::LTP)?,
        buy_quantity: fields.u32_or_zero(tag::BUY_QUANTITY)?,
        buy_price: fields.u32_or_zero(tag::BUY_PRICE)?,
        sell_quantity: fields.u32_or_zero(tag::SELL_QUANTITY)?,
        sell_price: fields.u32_or_zero(tag::SELL_PRICE)?,
        open: fields.u32_or_zero(tag::OPEN)?,
        high: fields.u32_or_zero(tag::HIGH)?,
        low: fields.u32_or_zero(tag::LOW)?,
        close: fields.u32_or_zero(tag::CLOSE)?,
        decimal_locator: fields.u32_or_zero(tag::DECIMAL_LOCATOR)?,
        previous_close: fields.u32_or_zero(tag::PREVIOUS_CLOSE)?,
        indicative_close: fields.u32_or_zero(tag::INDICATIVE_CLOSE)?,
    }))
}

fn decode_ack(fields: &Fields<'_>, message_code: u32) -> Result<Ack, DecodeError> {
    let status = match fields.parse_opt::<i32>(tag::STATUS)? {
        None | Some(0) => AckStatus::Accepted,
        Some(code) => AckStatus::Rejected {
            code,
            reason: fields.get(tag::REASON).map(str::to_string),
        },
    };

    Ok(Ack {
        request_id: fields.parse_opt(tag::REQUEST_ID)?,
        message_code,
        status,
    })
}

// =============================================================================
// Tests
// =============================================================================
