//! Connection State Machine
//!
//! Lifecycle of one feed session:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closing -> Disconnected
//!                      |                        ^
//!                      +------------------------+
//! ```
//!
//! A failed connect attempt goes through `Closing` like any other teardown.

use std::fmt;

use serde::Serialize;

/// State of a feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport open; control requests may be sent.
    Connected,
    /// Transport is being torn down.
    Closing,
}

impl ConnectionState {
    /// Label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }

    /// Whether control requests may be sent.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a transition is valid.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting | Self::Connected, Self::Closing)
                | (Self::Closing, Self::Disconnected)
        )
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the move is not allowed from the
    /// current state.
    pub const fn transition(self, to: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted transition not allowed by the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection transition from {from} to {to}")]
pub struct InvalidTransition {
    /// State before the attempt.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}
