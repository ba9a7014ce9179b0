//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionController`: Subscription book, pause state and the
//!   pending-request table reconciled against server acknowledgements

mod subscription_controller;

pub use subscription_controller::{
    AckOutcome, NegativeAck, SubscriptionController, SubscriptionError, parse_scrips,
};
