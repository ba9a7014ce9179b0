//! Control Requests
//!
//! Codec-agnostic description of the control requests the client sends to the
//! feed server: subscribe, unsubscribe and pause/resume. The wire encoding of
//! these lives in the infrastructure layer.

use std::fmt;

use serde::Serialize;

use crate::domain::streaming::Scrip;
use crate::domain::subscription::SubscriptionMode;

/// Message codes (tag 64).
///
/// A request and its acknowledgement share a code, so acks that carry no
/// request id are matched on it.
pub mod code {
    /// Login request / response.
    pub const LOGIN: u32 = 101;
    /// Pause or resume broadcast.
    pub const PAUSE_RESUME: u32 = 106;
    /// Best-five depth.
    pub const BEST_FIVE: u32 = 127;
    /// Full touchline.
    pub const TOUCHLINE: u32 = 206;
    /// LTP touchline.
    pub const LTP_TOUCHLINE: u32 = 347;
}

/// Message code used to (un)subscribe a mode.
#[must_use]
pub const fn mode_code(mode: SubscriptionMode) -> u32 {
    match mode {
        SubscriptionMode::Ltp => code::LTP_TOUCHLINE,
        SubscriptionMode::Touchline => code::TOUCHLINE,
        SubscriptionMode::BestFive => code::BEST_FIVE,
    }
}

/// Message code of a request with this mode; `None` is pause/resume.
#[must_use]
pub const fn request_code(mode: Option<SubscriptionMode>) -> u32 {
    match mode {
        Some(mode) => mode_code(mode),
        None => code::PAUSE_RESUME,
    }
}

/// Identity of a control request, echoed by the server on acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Start receiving data for scrips under a mode.
    Subscribe,
    /// Stop receiving data for scrips under a mode.
    Unsubscribe,
    /// Pause or resume the whole broadcast.
    PauseResume,
}

impl ControlAction {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::PauseResume => "pause_resume",
        }
    }
}

/// Touchline response options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TouchlineOptions {
    /// Request the fixed-length native binary touchline.
    pub native: bool,
    /// Only push a touchline when the last traded price changes.
    pub ltp_change_only: bool,
}

/// A control request ready to be encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlMessage {
    /// Request identity.
    pub request_id: RequestId,
    /// What the request does.
    pub action: ControlAction,
    /// Mode affected; `None` for pause/resume.
    pub mode: Option<SubscriptionMode>,
    /// Scrips affected; empty for pause/resume.
    pub scrips: Vec<Scrip>,
    /// Pause (`true`) or resume (`false`); only meaningful for pause/resume.
    pub is_pause: bool,
    /// Touchline options; only meaningful for touchline subscribes.
    pub touchline: TouchlineOptions,
}

impl ControlMessage {
    /// Build a subscribe request.
    #[must_use]
    pub fn subscribe(
        request_id: RequestId,
        mode: SubscriptionMode,
        scrips: Vec<Scrip>,
        touchline: TouchlineOptions,
    ) -> Self {
        Self {
            request_id,
            action: ControlAction::Subscribe,
            mode: Some(mode),
            scrips,
            is_pause: false,
            touchline,
        }
    }

    /// Build an unsubscribe request.
    #[must_use]
    pub fn unsubscribe(request_id: RequestId, mode: SubscriptionMode, scrips: Vec<Scrip>) -> Self {
        Self {
            request_id,
            action: ControlAction::Unsubscribe,
            mode: Some(mode),
            scrips,
            is_pause: false,
            touchline: TouchlineOptions::default(),
        }
    }

    /// Build a pause/resume request.
    #[must_use]
    pub fn pause_resume(request_id: RequestId, is_pause: bool) -> Self {
        Self {
            request_id,
            action: ControlAction::PauseResume,
            mode: None,
            scrips: Vec::new(),
            is_pause,
            touchline: TouchlineOptions::default(),
        }
    }

    /// Message code this request is sent under.
    #[must_use]
    pub const fn message_code(&self) -> u32 {
        request_code(self.mode)
    }
}
