//! Market Data Streaming Types
//!
//! Core domain types for the ODIN feed: scrip identifiers, touchline ticks,
//! best-five depth snapshots and control acknowledgements. These types are
//! codec-agnostic and represent the canonical internal representation of
//! market data handed to consumers.
//!
//! Prices travel on the wire as unsigned fixed-point integers together with a
//! *decimal locator* (the divisor, e.g. `100` for paise to rupees). Records keep
//! the raw integers and expose scaled [`Decimal`] accessors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::subscription::SubscriptionMode;

// =============================================================================
// Constants
// =============================================================================

/// Unix timestamp of 1980-01-01 00:00:00, the exchange time origin.
pub const EXCHANGE_EPOCH_UNIX_SECS: i64 = 315_532_800;

/// Number of price levels on each side of a best-five snapshot.
pub const DEPTH_LEVELS: usize = 5;

/// Convert exchange seconds (since 1980-01-01) into a naive timestamp.
#[must_use]
pub fn exchange_time(seconds: i32) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(EXCHANGE_EPOCH_UNIX_SECS + i64::from(seconds), 0)
        .map(|dt| dt.naive_utc())
}

/// Scale a raw wire price by its decimal locator.
///
/// A zero locator is treated as `1`.
#[must_use]
pub fn scale_price(raw: u32, decimal_locator: u32) -> Decimal {
    let divisor = decimal_locator.max(1);
    Decimal::from(raw) / Decimal::from(divisor)
}

// =============================================================================
// Scrip
// =============================================================================

/// Errors produced when parsing a `segment_token` scrip identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScripError {
    /// Input did not have the `segment_token` shape or a part was not numeric.
    #[error("invalid scrip format: '{0}', expected 'MarketSegmentID_Token'")]
    InvalidFormat(String),
}

/// A tradable instrument: market segment id plus token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Scrip {
    /// Exchange market segment id.
    pub segment: u32,
    /// Instrument token within the segment.
    pub token: u32,
}

impl Scrip {
    /// Create a scrip from its parts.
    #[must_use]
    pub const fn new(segment: u32, token: u32) -> Self {
        Self { segment, token }
    }
}

impl FromStr for Scrip {
    type Err = ScripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScripError::InvalidFormat(s.to_string());

        let mut parts = s.split('_');
        let (Some(segment), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        let segment = segment.trim().parse().map_err(|_| invalid())?;
        let token = token.trim().parse().map_err(|_| invalid())?;

        Ok(Self { segment, token })
    }
}

impl fmt::Display for Scrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.segment, self.token)
    }
}

// =============================================================================
// Touchline
// =============================================================================

/// Touchline tick: last traded price and summary fields for one scrip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Touchline {
    /// Instrument this tick belongs to.
    pub scrip: Scrip,
    /// Subscription the tick was produced for (LTP-only or full touchline).
    pub mode: SubscriptionMode,
    /// Last update time (exchange local).
    pub last_update_time: NaiveDateTime,
    /// Last trade time (exchange local).
    pub last_trade_time: NaiveDateTime,
    /// Last traded price (raw).
    pub ltp: u32,
    /// Best buy quantity.
    pub buy_quantity: u32,
    /// Best buy price (raw).
    pub buy_price: u32,
    /// Best sell quantity.
    pub sell_quantity: u32,
    /// Best sell price (raw).
    pub sell_price: u32,
    /// Session open price (raw).
    pub open: u32,
    /// Session high price (raw).
    pub high: u32,
    /// Session low price (raw).
    pub low: u32,
    /// Close price (raw).
    pub close: u32,
    /// Price divisor for every raw price on this record.
    pub decimal_locator: u32,
    /// Previous session close (raw).
    pub previous_close: u32,
    /// Indicative close (raw).
    pub indicative_close: u32,
}

impl Touchline {
    /// Last traded price scaled by the decimal locator.
    #[must_use]
    pub fn ltp_price(&self) -> Decimal {
        scale_price(self.ltp, self.decimal_locator)
    }

    /// Best bid scaled by the decimal locator.
    #[must_use]
    pub fn bid_price(&self) -> Decimal {
        scale_price(self.buy_price, self.decimal_locator)
    }

    /// Best ask scaled by the decimal locator.
    #[must_use]
    pub fn ask_price(&self) -> Decimal {
        scale_price(self.sell_price, self.decimal_locator)
    }

    /// Close price scaled by the decimal locator.
    #[must_use]
    pub fn close_price(&self) -> Decimal {
        scale_price(self.close, self.decimal_locator)
    }

    /// Change of the last traded price against the previous close.
    #[must_use]
    pub fn change(&self) -> Decimal {
        self.ltp_price() - scale_price(self.previous_close, self.decimal_locator)
    }
}

// =============================================================================
// Depth
// =============================================================================

/// One price level of a depth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DepthLevel {
    /// Level price (raw).
    pub price: u32,
    /// Aggregate quantity at this price.
    pub quantity: u32,
    /// Number of orders at this price.
    pub orders: u32,
}

/// Best-five market depth snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Depth {
    /// Instrument this snapshot belongs to.
    pub scrip: Scrip,
    /// Last update time (exchange local).
    pub last_update_time: NaiveDateTime,
    /// Bid levels, best first.
    pub bids: [DepthLevel; DEPTH_LEVELS],
    /// Ask levels, best first.
    pub asks: [DepthLevel; DEPTH_LEVELS],
    /// Price divisor for every level price.
    pub decimal_locator: u32,
}

impl Depth {
    /// Scaled price of a level.
    #[must_use]
    pub fn level_price(&self, level: &DepthLevel) -> Decimal {
        scale_price(level.price, self.decimal_locator)
    }

    /// Best bid level, if it carries any quantity.
    #[must_use]
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first().filter(|l| l.quantity > 0)
    }

    /// Best ask level, if it carries any quantity.
    #[must_use]
    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first().filter(|l| l.quantity > 0)
    }
}

// =============================================================================
// Acknowledgement
// =============================================================================

/// Outcome carried by a server acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AckStatus {
    /// Request was accepted.
    Accepted,
    /// Request was rejected by the server.
    Rejected {
        /// Server status code.
        code: i32,
        /// Human readable reason, when supplied.
        reason: Option<String>,
    },
}

impl AckStatus {
    /// Whether the acknowledgement is positive.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Server acknowledgement of a control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Identity of the request being acknowledged, when echoed.
    pub request_id: Option<u64>,
    /// Message code of the acknowledged request.
    pub message_code: u32,
    /// Acknowledgement outcome.
    pub status: AckStatus,
}

// =============================================================================
// Market Record
// =============================================================================

/// A decoded record handed to the consumer.
///
/// `Unknown` keeps the raw message bytes so that server-added record types do
/// not fail a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketRecord {
    /// Touchline / LTP tick.
    Touchline(Touchline),
    /// Best-five depth snapshot.
    Depth(Depth),
    /// Control acknowledgement.
    Ack(Ack),
    /// Record with an unrecognised message code.
    Unknown {
        /// Message code as read from the wire.
        message_code: u32,
        /// Raw message bytes.
        raw: Vec<u8>,
    },
}

impl MarketRecord {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Touchline(_) => "touchline",
            Self::Depth(_) => "depth",
            Self::Ack(_) => "ack",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Scrip the record refers to, if any.
    #[must_use]
    pub const fn scrip(&self) -> Option<Scrip> {
        match self {
            Self::Touchline(t) => Some(t.scrip),
            Self::Depth(d) => Some(d.scrip),
            Self::Ack(_) | Self::Unknown { .. } => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
