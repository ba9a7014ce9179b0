#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! ODIN Market Feed - Streaming Market Data Client
//!
//! Client core for the ODIN broadcast feed: keeps one WebSocket session,
//! turns its compressed binary stream into typed market records and manages
//! scrip subscriptions with optimistic, acknowledgement-reconciled state.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `streaming`: Scrips, touchline, best-five depth, acknowledgements
//!   - `subscription`: Subscription book and pause state
//!   - `control`: Control requests
//!   - `connection`: Session lifecycle state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport and consumer interfaces
//!   - `services`: Subscription controller
//!
//! - **Infrastructure**: Adapters and ambient concerns
//!   - `odin`: Packet framing, zlib, record codec, session and WebSocket transport
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! WebSocket frames ─► Reassembler ─► Decompressor ─► RecordDecoder ─┐
//!                                                                    ▼
//! FeedClient::subscribe ─► SubscriptionController ─► transport   FeedEvent ─► consumer
//!                                   ▲                                │
//!                                   └──────────── Ack ───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Crate-wide error type.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::control::{ControlAction, ControlMessage, RequestId, TouchlineOptions};
pub use domain::streaming::{Ack, AckStatus, Depth, DepthLevel, MarketRecord, Scrip, Touchline};
pub use domain::subscription::{PauseState, SubscriptionBook, SubscriptionMode, SubscriptionStats};

// Ports
pub use application::ports::{
    Endpoint, FeedConnector, FeedEvent, FeedHandler, FeedTransport, TransportError,
    TransportFrame, dispatch_events,
};

// Services
pub use application::services::{NegativeAck, SubscriptionController, SubscriptionError};

// Errors
pub use error::FeedError;

// Infrastructure config
pub use infrastructure::config::{
    ChannelSettings, ConfigError, Credentials, DemoSettings, FeedConfig, SessionSettings,
};

// Session
pub use infrastructure::odin::{FeedClient, SessionSnapshot, WebSocketConnector};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
