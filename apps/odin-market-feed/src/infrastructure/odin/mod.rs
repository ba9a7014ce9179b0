//! ODIN Feed Adapter
//!
//! Wire protocol, session state machine and transport for the ODIN market
//! feed.
//!
//! # Modules
//!
//! - `framing`: length-prefixed packets over a byte stream
//! - `compression`: zlib inflate/deflate
//! - `codec`: inner messages and binary record layouts
//! - `messages`: message codes, tags and outbound request text
//! - `session`: synchronous session core
//! - `client`: async session task and its handle
//! - `websocket`: `tokio-tungstenite` transport

pub mod client;
pub mod codec;
pub mod compression;
pub mod framing;
pub mod messages;
pub mod session;
pub mod websocket;

pub use client::{FeedClient, NORMAL_CLOSURE, SessionSnapshot};
pub use session::{FrameOutcome, OutboundRequest, SessionCore};
pub use websocket::{WebSocketConnector, WebSocketTransport};
