//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector` / `FeedTransport`: byte-frame connection to the feed
//!   server (WebSocket in production, in-memory in tests)
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedHandler`: consumer callbacks, driven from the ordered event channel

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::streaming::MarketRecord;
use crate::error::FeedError;

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Transport could not be opened.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// Frame could not be read.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Transport is already closed.
    #[error("transport closed")]
    Closed,
}

/// One inbound item from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// Binary payload.
    Binary(Vec<u8>),
    /// Peer closed the connection.
    Closed {
        /// Close code, when supplied.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Use TLS.
    pub use_tls: bool,
}

impl Endpoint {
    /// WebSocket URL of the endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// An open byte-frame connection.
#[async_trait]
pub trait FeedTransport: Send {
    /// Write one binary frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Read the next frame. `None` once the stream has ended.
    ///
    /// Must be cancel safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a transport to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn FeedTransport>, TransportError>;
}

// =============================================================================
// Consumer
// =============================================================================

/// Event delivered to the consumer, in session order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Transport opened and login sent.
    Open,
    /// Decoded record.
    Message(MarketRecord),
    /// Recoverable or fatal error.
    Error(FeedError),
    /// Session ended.
    Close {
        /// Close code, when the peer supplied one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Consumer callbacks.
#[cfg_attr(test, mockall::automock)]
pub trait FeedHandler: Send {
    /// Session opened.
    fn on_open(&mut self);

    /// A record was decoded.
    fn on_message(&mut self, record: MarketRecord);

    /// An error occurred.
    fn on_error(&mut self, error: FeedError);

    /// Session closed.
    fn on_close(&mut self, code: Option<u16>, reason: String);
}

/// Drive a handler from an event channel until the channel closes.
///
/// Callbacks run in event order on the caller's task.
pub async fn dispatch_events<H: FeedHandler + ?Sized>(
    mut events: mpsc::Receiver<FeedEvent>,
    handler: &mut H,
) {
    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::Open => handler.on_open(),
            FeedEvent::Message(record) => handler.on_message(record),
            FeedEvent::Error(error) => handler.on_error(error),
            FeedEvent::Close { code, reason } => handler.on_close(code, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::{Ack, AckStatus};
    use mockall::Sequence;

    #[test]
    fn endpoint_url_scheme_follows_tls() {
        let mut endpoint = Endpoint {
            host: "feed.example.com".to_string(),
            port: 4509,
            use_tls: false,
        };
        assert_eq!(endpoint.url(), "ws://feed.example.com:4509");

        endpoint.use_tls = true;
        assert_eq!(endpoint.url(), "wss://feed.example.com:4509");
    }

    #[tokio::test]
    async fn dispatch_preserves_event_order() {
        let (tx, rx) = mpsc::channel(8);
        let ack = MarketRecord::Ack(Ack {
            request_id: Some(1),
            message_code: 347,
            status: AckStatus::Accepted,
        });

        tx.send(FeedEvent::Open).await.unwrap();
        tx.send(FeedEvent::Message(ack.clone())).await.unwrap();
        tx.send(FeedEvent::Error(FeedError::Transport(TransportError::Closed)))
            .await
            .unwrap();
        tx.send(FeedEvent::Close {
            code: Some(1000),
            reason: "bye".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let mut seq = Sequence::new();
        let mut handler = MockFeedHandler::new();
        handler
            .expect_on_open()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler
            .expect_on_message()
            .withf(move |r| *r == ack)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler
            .expect_on_error()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        handler
            .expect_on_close()
            .withf(|code, reason| *code == Some(1000) && reason == "bye")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        dispatch_events(rx, &mut handler).await;
    }
}
