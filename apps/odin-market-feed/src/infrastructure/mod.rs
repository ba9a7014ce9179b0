//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the wire protocol, the transport adapter and the
//! ambient concerns (configuration, metrics, tracing).

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// ODIN wire protocol, session and WebSocket transport.
pub mod odin;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
