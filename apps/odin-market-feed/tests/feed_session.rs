//! Feed Session Integration Tests
//!
//! Drives `FeedClient` end to end over an in-memory transport: frames go in
//! on one channel, written requests come out on another.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use tokio::sync::mpsc;
use tokio::time::timeout;

use odin_market_feed::infrastructure::odin::compression::{Compression, compress};
use odin_market_feed::infrastructure::odin::framing::{
    FramingError, PayloadEncoding, encode_packet,
};
use odin_market_feed::{
    ConnectionState, Credentials, Endpoint, FeedClient, FeedConfig, FeedConnector, FeedError,
    FeedEvent, FeedHandler, FeedTransport, MarketRecord, Scrip, SubscriptionError,
    SubscriptionMode, TransportError, TransportFrame, dispatch_events,
};
use odin_market_feed::infrastructure::odin::codec::DecodeError;

const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// In-memory transport
// =============================================================================

struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<TransportFrame>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl FeedTransport for ChannelTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound.close();
        Ok(())
    }
}

struct ChannelConnector {
    transport: parking_lot::Mutex<Option<ChannelTransport>>,
}

#[async_trait]
impl FeedConnector for ChannelConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn FeedTransport>, TransportError> {
        self.transport
            .lock()
            .take()
            .map(|t| Box::new(t) as Box<dyn FeedTransport>)
            .ok_or_else(|| TransportError::Connect("connection refused".to_string()))
    }
}

struct PendingConnector;

#[async_trait]
impl FeedConnector for PendingConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn FeedTransport>, TransportError> {
        std::future::pending().await
    }
}

/// Accepts a fixed number of writes, then fails every send.
struct FailingTransport {
    writes_left: usize,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FeedTransport for FailingTransport {
    async fn send(&mut self, _frame: Vec<u8>) -> Result<(), TransportError> {
        if self.writes_left == 0 {
            return Err(TransportError::Closed);
        }
        self.writes_left -= 1;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingConnector {
    transport: parking_lot::Mutex<Option<FailingTransport>>,
}

#[async_trait]
impl FeedConnector for FailingConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn FeedTransport>, TransportError> {
        self.transport
            .lock()
            .take()
            .map(|t| Box::new(t) as Box<dyn FeedTransport>)
            .ok_or_else(|| TransportError::Connect("connection refused".to_string()))
    }
}

fn failing_connector(writes_left: usize) -> (Arc<FailingConnector>, Arc<AtomicBool>) {
    let closed = Arc::new(AtomicBool::new(false));
    let connector = Arc::new(FailingConnector {
        transport: parking_lot::Mutex::new(Some(FailingTransport {
            writes_left,
            closed: Arc::clone(&closed),
        })),
    });
    (connector, closed)
}

mock! {
    Handler {}

    impl FeedHandler for Handler {
        fn on_open(&mut self);
        fn on_message(&mut self, record: MarketRecord);
        fn on_error(&mut self, error: FeedError);
        fn on_close(&mut self, code: Option<u16>, reason: String);
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    client: FeedClient,
    events: mpsc::Receiver<FeedEvent>,
    server: mpsc::UnboundedSender<TransportFrame>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Harness {
    async fn next_event(&mut self) -> FeedEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn push(&self, bytes: Vec<u8>) {
        self.server.send(TransportFrame::Binary(bytes)).unwrap();
    }

    /// Text of the next request written, assuming compression is off.
    fn next_request(&mut self) -> String {
        let frame = self.sent.try_recv().expect("no request written");
        assert_eq!(frame[0], PayloadEncoding::Raw.marker());
        String::from_utf8(frame[6..].to_vec()).unwrap()
    }
}

fn config(compression: Compression) -> FeedConfig {
    let mut config = FeedConfig::new(
        "feed.test",
        4509,
        false,
        Credentials::new("TRADER1".to_string(), None),
    )
    .unwrap();
    config.session.compression = compression;
    config
}

async fn open_session() -> Harness {
    let (server, inbound) = mpsc::unbounded_channel();
    let (outbound, sent) = mpsc::unbounded_channel();
    let connector = Arc::new(ChannelConnector {
        transport: parking_lot::Mutex::new(Some(ChannelTransport { inbound, outbound })),
    });

    let (client, events) = FeedClient::connect(connector, &config(Compression::Off)).unwrap();
    let mut harness = Harness {
        client,
        events,
        server,
        sent,
    };

    assert_eq!(harness.next_event().await, FeedEvent::Open);
    let login = harness.next_request();
    assert!(login.contains("64=101|65=74|"));
    assert!(login.contains("67=TRADER1"));
    assert_eq!(harness.client.state(), ConnectionState::Connected);
    harness
}

// =============================================================================
// Wire builders
// =============================================================================

fn envelope(message: &[u8]) -> Vec<u8> {
    let mut out = format!("\x02{:05}", message.len()).into_bytes();
    out.extend_from_slice(message);
    out
}

fn raw_packet(message: &[u8]) -> Vec<u8> {
    encode_packet(PayloadEncoding::Raw, &envelope(message)).unwrap()
}

fn zlib_packet(message: &[u8]) -> Vec<u8> {
    encode_packet(PayloadEncoding::Zlib, &compress(&envelope(message)).unwrap()).unwrap()
}

fn binary_touchline(segment: u32, token: u32, ltp: u32) -> Vec<u8> {
    let fields: [u32; 16] = [
        segment, token, 1_400_000_000, 1_399_999_990, ltp, 50, 245_000, 75, 245_100, 244_000,
        246_000, 243_500, 244_500, 100, 244_500, 0,
    ];
    let mut msg = b"63=FT3.0|64=206|50=".to_vec();
    msg.extend(fields.iter().flat_map(|f| f.to_le_bytes()));
    msg
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn compressed_touchline_split_across_two_frames() {
    let harness = open_session().await;
    let packet = zlib_packet(&binary_touchline(1, 22, 245_050));
    let (head, tail) = packet.split_at(10);

    harness.push(head.to_vec());
    harness.push(tail.to_vec());
    harness
        .server
        .send(TransportFrame::Closed {
            code: Some(1000),
            reason: "end of day".to_string(),
        })
        .unwrap();

    let mut handler = MockHandler::new();
    handler
        .expect_on_message()
        .withf(|record| match record {
            MarketRecord::Touchline(t) => t.scrip == Scrip::new(1, 22) && t.ltp == 245_050,
            _ => false,
        })
        .times(1)
        .return_const(());
    handler.expect_on_error().never();
    handler
        .expect_on_close()
        .withf(|code, reason| *code == Some(1000) && reason == "end of day")
        .times(1)
        .return_const(());

    timeout(WAIT, dispatch_events(harness.events, &mut handler))
        .await
        .unwrap();
}

#[tokio::test]
async fn unsubscribe_of_unknown_scrip_sends_nothing() {
    let mut harness = open_session().await;

    let sent = harness
        .client
        .unsubscribe(&["1_22"], SubscriptionMode::Ltp)
        .await
        .unwrap();

    assert!(!sent);
    assert!(harness.sent.try_recv().is_err());
    assert_eq!(harness.client.snapshot().subscriptions.scrips, 0);
}

#[tokio::test]
async fn subscribe_writes_request_and_tracks_state() {
    let mut harness = open_session().await;

    harness
        .client
        .subscribe(&["1_22", "1_2885"], SubscriptionMode::Ltp)
        .await
        .unwrap();

    let request = harness.next_request();
    assert!(request.starts_with("63=FT3.0|64=347|65=84|"));
    assert!(request.ends_with("|4=1|1=1$7=22|1=1$7=2885|230=1"));

    let snapshot = harness.client.snapshot();
    assert_eq!(snapshot.subscriptions.ltp, 2);
    assert_eq!(snapshot.pending_requests, 1);
}

#[tokio::test]
async fn negative_ack_rolls_back_subscription() {
    let mut harness = open_session().await;
    harness
        .client
        .subscribe(&["1_22"], SubscriptionMode::Touchline)
        .await
        .unwrap();
    assert_eq!(harness.client.snapshot().subscriptions.touchline, 1);

    harness.push(raw_packet(b"63=FT3.0|64=206|4=1|9=16|10=limit reached"));

    assert!(matches!(
        harness.next_event().await,
        FeedEvent::Message(MarketRecord::Ack(_))
    ));
    match harness.next_event().await {
        FeedEvent::Error(FeedError::NegativeAck(nack)) => {
            assert_eq!(nack.mode, Some(SubscriptionMode::Touchline));
            assert_eq!(nack.scrips, vec![Scrip::new(1, 22)]);
            assert_eq!(nack.code, 16);
            assert_eq!(nack.reason.as_deref(), Some("limit reached"));
        }
        other => panic!("expected negative ack, got {other:?}"),
    }

    let snapshot = harness.client.snapshot();
    assert_eq!(snapshot.subscriptions.touchline, 0);
    assert_eq!(snapshot.pending_requests, 0);
}

#[tokio::test]
async fn invalid_scrip_is_rejected_locally() {
    let mut harness = open_session().await;

    let err = harness
        .client
        .subscribe(&["1_22", "NSE:RELIANCE"], SubscriptionMode::Ltp)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FeedError::Subscription(SubscriptionError::InvalidScripFormat(_))
    ));
    assert!(harness.sent.try_recv().is_err());
    assert_eq!(harness.client.snapshot().subscriptions.scrips, 0);
}

#[tokio::test]
async fn pause_conflicts_with_pending_resume() {
    let mut harness = open_session().await;

    harness.client.pause().await.unwrap();
    assert!(harness.next_request().contains("64=106|65=84|"));

    let err = harness.client.resume().await.unwrap_err();
    assert!(matches!(
        err,
        FeedError::Subscription(SubscriptionError::ConflictingPauseRequest { .. })
    ));

    harness.push(raw_packet(b"63=FT3.0|64=106|4=1|9=0"));
    assert!(matches!(
        harness.next_event().await,
        FeedEvent::Message(MarketRecord::Ack(_))
    ));

    harness.client.resume().await.unwrap();
    assert!(harness.next_request().ends_with("230=2"));
}

#[tokio::test]
async fn protocol_violation_reports_then_closes() {
    let mut harness = open_session().await;

    harness.push(b"\x09garbage-bytes".to_vec());

    assert_eq!(
        harness.next_event().await,
        FeedEvent::Error(FeedError::ProtocolViolation(FramingError::UnknownMarker(0x09)))
    );
    assert!(matches!(harness.next_event().await, FeedEvent::Close { .. }));
    assert_eq!(harness.client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn corrupt_payload_does_not_end_session() {
    let mut harness = open_session().await;

    harness.push(encode_packet(PayloadEncoding::Zlib, b"definitely not zlib").unwrap());
    assert!(matches!(
        harness.next_event().await,
        FeedEvent::Error(FeedError::Decode(DecodeError::CorruptPayload(_)))
    ));

    harness.push(zlib_packet(&binary_touchline(1, 2885, 10_000)));
    match harness.next_event().await {
        FeedEvent::Message(record) => assert_eq!(record.scrip(), Some(Scrip::new(1, 2885))),
        other => panic!("expected touchline, got {other:?}"),
    }
    assert_eq!(harness.client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn disconnect_mid_packet_delivers_no_partial_record() {
    let mut harness = open_session().await;
    let packet = zlib_packet(&binary_touchline(1, 22, 1));
    harness.push(packet[..8].to_vec());

    harness.client.disconnect().await;

    match harness.next_event().await {
        FeedEvent::Close { code, .. } => assert_eq!(code, Some(1000)),
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(harness.client.state(), ConnectionState::Disconnected);
    assert_eq!(
        harness.client.subscribe(&["1_22"], SubscriptionMode::Ltp).await,
        Err(FeedError::NotConnected(ConnectionState::Disconnected))
    );
}

#[tokio::test]
async fn control_calls_fail_fast_while_connecting() {
    let (client, mut events) =
        FeedClient::connect(Arc::new(PendingConnector), &config(Compression::On)).unwrap();

    assert_eq!(
        client.subscribe(&["1_22"], SubscriptionMode::Ltp).await,
        Err(FeedError::NotConnected(ConnectionState::Connecting))
    );

    client.disconnect().await;
    let event = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(event, Some(FeedEvent::Close { .. })));
}

#[tokio::test]
async fn refused_connection_reports_error_then_close() {
    let connector = Arc::new(ChannelConnector {
        transport: parking_lot::Mutex::new(None),
    });
    let (client, mut events) = FeedClient::connect(connector, &config(Compression::On)).unwrap();

    let first = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(
        first,
        Some(FeedEvent::Error(FeedError::Transport(TransportError::Connect(_))))
    ));
    let second = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(second, Some(FeedEvent::Close { code: None, .. })));

    assert_eq!(
        client.subscribe(&["1_22"], SubscriptionMode::Ltp).await,
        Err(FeedError::NotConnected(ConnectionState::Disconnected))
    );
}

#[tokio::test]
async fn failed_login_write_closes_transport() {
    let (connector, closed) = failing_connector(0);
    let (client, mut events) = FeedClient::connect(connector, &config(Compression::Off)).unwrap();

    let first = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(
        first,
        Some(FeedEvent::Error(FeedError::Transport(TransportError::Closed)))
    ));
    let second = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(second, Some(FeedEvent::Close { code: None, .. })));

    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn failed_request_write_rolls_back_and_closes_transport() {
    let (connector, closed) = failing_connector(1);
    let (client, mut events) = FeedClient::connect(connector, &config(Compression::Off)).unwrap();
    let next = timeout(WAIT, events.recv()).await.unwrap();
    assert_eq!(next, Some(FeedEvent::Open));

    assert_eq!(
        client.subscribe(&["1_22"], SubscriptionMode::Ltp).await,
        Err(FeedError::Transport(TransportError::Closed))
    );

    let next = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(next, Some(FeedEvent::Close { code: None, .. })));
    assert!(closed.load(Ordering::SeqCst));

    let snapshot = client.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.pending_requests, 0);
    assert_eq!(snapshot.subscriptions.scrips, 0);
}
