//! Feed error taxonomy.
//!
//! Every layer has its own error enum; [`FeedError`] aggregates them and is
//! what the consumer receives through `on_error`.
//!
//! | Variant | Session impact |
//! |---------|----------------|
//! | `ProtocolViolation` | fatal: error reported, then forced close |
//! | `Decode` | message dropped, session continues |
//! | `Subscription` / `NotConnected` | returned synchronously, no impact |
//! | `NegativeAck` | optimistic state rolled back, session continues |
//! | `LoginRejected` | reported, session continues until the server closes |
//! | `Transport` | session closes |

use crate::application::ports::TransportError;
use crate::application::services::{NegativeAck, SubscriptionError};
use crate::domain::connection::{ConnectionState, InvalidTransition};
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::odin::codec::DecodeError;
use crate::infrastructure::odin::framing::FramingError;

/// Any error the feed client reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Inbound stream broke the framing rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(FramingError),

    /// Outbound request could not be framed.
    #[error("failed to frame outbound request: {0}")]
    Outbound(FramingError),

    /// Message could not be inflated or decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Control call failed local validation.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Control call made while the session is not connected.
    #[error("not connected (session is {0})")]
    NotConnected(ConnectionState),

    /// Lifecycle call made in the wrong state.
    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    /// Server rejected a control request.
    #[error("negative acknowledgement: {0}")]
    NegativeAck(NegativeAck),

    /// Server rejected the login.
    #[error("login rejected (code {code}): {}", reason.as_deref().unwrap_or("no reason given"))]
    LoginRejected {
        /// Server status code.
        code: i32,
        /// Server reason, when supplied.
        reason: Option<String>,
    },

    /// Transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FeedError {
    /// Whether the error ends the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::Transport(_))
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Outbound(_) => "outbound",
            Self::Decode(e) => e.kind(),
            Self::Subscription(SubscriptionError::EmptyScripList) => "empty_scrip_list",
            Self::Subscription(SubscriptionError::InvalidScripFormat(_)) => "invalid_scrip_format",
            Self::Subscription(SubscriptionError::ConflictingPauseRequest { .. }) => {
                "conflicting_pause_request"
            }
            Self::NotConnected(_) => "not_connected",
            Self::InvalidState(_) => "invalid_state",
            Self::NegativeAck(_) => "negative_ack",
            Self::LoginRejected { .. } => "login_rejected",
            Self::Transport(_) => "transport",
            Self::Config(_) => "config",
        }
    }
}
