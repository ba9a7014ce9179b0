//! Application Layer - Use cases and port definitions.
//!
//! This layer holds the subscription controller and the port interfaces
//! that connect the session to transports and consumers.

/// Port interfaces (transport, consumer callbacks).
pub mod ports;

/// Application services (subscription control).
pub mod services;
