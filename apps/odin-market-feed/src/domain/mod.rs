//! Domain Layer - Core market data types and subscription state.
//!
//! This layer contains the core domain types for the feed with no I/O. All
//! types here are pure Rust with serialization support.

/// Session lifecycle state machine.
pub mod connection;

/// Control requests (subscribe, unsubscribe, pause/resume).
pub mod control;

/// Market data record types (scrips, touchline, depth, acknowledgements).
pub mod streaming;

/// Subscription tracking and pause state.
pub mod subscription;
