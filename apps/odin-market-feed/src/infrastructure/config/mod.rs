//! Configuration Module
//!
//! Configuration loading for the feed client.

mod settings;

pub use settings::{
    ChannelSettings, ConfigError, Credentials, DemoSettings, FeedConfig, MAX_HOST_LEN,
    MAX_USER_ID_LEN, SessionSettings,
};
