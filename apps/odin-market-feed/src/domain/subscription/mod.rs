//! Subscription Management Types
//!
//! Domain types for tracking which scrips the session is subscribed to and
//! under which modes, plus the global pause flag.
//!
//! # Design
//!
//! The subscription book tracks:
//! - A mapping from scrip to its set of active modes
//! - Removal of a scrip entry once its last mode is removed
//! - Separate accounting per mode (LTP, touchline, best five)
//!
//! The book itself is a plain owned value: it is mutated only by the
//! subscription controller, which runs inside the single session task.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::domain::streaming::Scrip;

// =============================================================================
// Types
// =============================================================================

/// Market data subscription mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    /// Last traded price touchline.
    Ltp,
    /// Full touchline.
    Touchline,
    /// Best-five market depth.
    BestFive,
}

impl SubscriptionMode {
    /// Get all subscription modes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ltp, Self::Touchline, Self::BestFive]
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Touchline => "touchline",
            Self::BestFive => "best_five",
        }
    }
}

/// Global pause state of the broadcast.
///
/// Pausing is a server directive: this layer never suppresses ticks itself, it
/// only remembers what it last asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    /// Broadcast flowing.
    #[default]
    Resumed,
    /// Broadcast paused.
    Paused,
}

impl PauseState {
    /// Build from a boolean pause flag.
    #[must_use]
    pub const fn from_paused(paused: bool) -> Self {
        if paused { Self::Paused } else { Self::Resumed }
    }

    /// Whether the broadcast is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Mapping from scrip to its active subscription modes.
///
/// Invariant: a scrip present in the map has at least one mode.
///
/// # Example
///
/// ```rust
/// use odin_market_feed::domain::streaming::Scrip;
/// use odin_market_feed::domain::subscription::{SubscriptionBook, SubscriptionMode};
///
/// let mut book = SubscriptionBook::new();
/// let scrip = Scrip::new(1, 22);
///
/// let added = book.add(SubscriptionMode::Ltp, &[scrip]);
/// assert_eq!(added, vec![scrip]);
///
/// // Already present - nothing changes
/// assert!(book.add(SubscriptionMode::Ltp, &[scrip]).is_empty());
///
/// let removed = book.remove(SubscriptionMode::Ltp, &[scrip]);
/// assert_eq!(removed, vec![scrip]);
/// assert!(book.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionBook {
    entries: HashMap<Scrip, HashSet<SubscriptionMode>>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mode to scrips.
    ///
    /// Returns the scrips for which the mode was not active before.
    pub fn add(&mut self, mode: SubscriptionMode, scrips: &[Scrip]) -> Vec<Scrip> {
        let mut added = Vec::new();

        for scrip in scrips {
            if self.entries.entry(*scrip).or_default().insert(mode) {
                added.push(*scrip);
            }
        }

        added
    }

    /// Remove a mode from scrips.
    ///
    /// Returns the scrips for which the mode was active. Entries left without
    /// modes are dropped.
    pub fn remove(&mut self, mode: SubscriptionMode, scrips: &[Scrip]) -> Vec<Scrip> {
        let mut removed = Vec::new();

        for scrip in scrips {
            let Some(modes) = self.entries.get_mut(scrip) else {
                continue;
            };

            if modes.remove(&mode) {
                removed.push(*scrip);
            }

            if modes.is_empty() {
                self.entries.remove(scrip);
            }
        }

        removed
    }

    /// Check whether a scrip is subscribed under a mode.
    #[must_use]
    pub fn contains(&self, scrip: &Scrip, mode: SubscriptionMode) -> bool {
        self.entries
            .get(scrip)
            .is_some_and(|modes| modes.contains(&mode))
    }

    /// Active modes for a scrip, sorted.
    #[must_use]
    pub fn modes(&self, scrip: &Scrip) -> Vec<SubscriptionMode> {
        let mut modes: Vec<_> = self
            .entries
            .get(scrip)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        modes.sort_unstable();
        modes
    }

    /// Scrips subscribed under a mode, sorted.
    #[must_use]
    pub fn active_scrips(&self, mode: SubscriptionMode) -> Vec<Scrip> {
        let mut scrips: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, modes)| modes.contains(&mode))
            .map(|(scrip, _)| *scrip)
            .collect();
        scrips.sort_unstable();
        scrips
    }

    /// Number of scrips with at least one mode.
    #[must_use]
    pub fn scrip_count(&self) -> usize {
        self.entries.len()
    }

    /// Check if the book has no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Per-mode statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let count = |mode| {
            self.entries
                .values()
                .filter(|modes| modes.contains(&mode))
                .count()
        };

        SubscriptionStats {
            scrips: self.scrip_count(),
            ltp: count(SubscriptionMode::Ltp),
            touchline: count(SubscriptionMode::Touchline),
            best_five: count(SubscriptionMode::BestFive),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of distinct scrips.
    pub scrips: usize,
    /// Scrips with an LTP subscription.
    pub ltp: usize,
    /// Scrips with a touchline subscription.
    pub touchline: usize,
    /// Scrips with a best-five subscription.
    pub best_five: usize,
}

impl SubscriptionStats {
    /// Count for a single mode.
    #[must_use]
    pub const fn for_mode(&self, mode: SubscriptionMode) -> usize {
        match mode {
            SubscriptionMode::Ltp => self.ltp,
            SubscriptionMode::Touchline => self.touchline,
            SubscriptionMode::BestFive => self.best_five,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
