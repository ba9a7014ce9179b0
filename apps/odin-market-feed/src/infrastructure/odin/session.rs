//! Session Core
//!
//! Synchronous state of one feed session: lifecycle, inbound pipeline and
//! control path. The async [`FeedClient`](super::client::FeedClient) owns one
//! `SessionCore` and is the only caller, so no call here ever suspends or
//! locks.
//!
//! # Inbound Pipeline
//!
//! ```text
//! frame ─► Reassembler ─► Decompressor ─► split_messages ─► RecordDecoder
//!                                                                │
//!                   FeedEvent::Message / FeedEvent::Error ◄──────┘
//! ```
//!
//! Packets released before a framing violation are still decoded and
//! delivered; the violation itself is reported last and closes the session.
//! A message that fails to inflate or decode is reported and dropped.

use std::time::Instant;

use crate::application::ports::FeedEvent;
use crate::application::services::{AckOutcome, NegativeAck, SubscriptionController};
use crate::domain::connection::ConnectionState;
use crate::domain::control::{ControlMessage, RequestId};
use crate::domain::streaming::{Ack, AckStatus, MarketRecord};
use crate::domain::subscription::{PauseState, SubscriptionBook, SubscriptionMode};
use crate::error::FeedError;
use crate::infrastructure::config::SessionSettings;
use crate::infrastructure::metrics;

use super::codec::{DecodeError, RecordDecoder, split_messages};
use super::compression::{Compression, Decompressor};
use super::framing::{Packet, Reassembler, frame_outbound};
use super::messages::{LoginRequest, code, encode_control, local_time};

// =============================================================================
// Outputs
// =============================================================================

/// A framed control request ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Identity to roll back if the write fails.
    pub request_id: RequestId,
    /// Framed bytes.
    pub frame: Vec<u8>,
}

/// Result of processing one inbound frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Events in dispatch order.
    pub events: Vec<FeedEvent>,
    /// The transport must be closed.
    pub close: bool,
}

// =============================================================================
// Session Core
// =============================================================================

/// State machine and codec pipeline of one session.
#[derive(Debug)]
pub struct SessionCore {
    state: ConnectionState,
    reassembler: Reassembler,
    decompressor: Decompressor,
    decoder: RecordDecoder,
    controller: SubscriptionController,
    compression: Compression,
    login: LoginRequest,
}

impl SessionCore {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(settings: &SessionSettings, login: LoginRequest) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reassembler: Reassembler::new(settings.framing_policy),
            decompressor: Decompressor::new(settings.max_inflated_len),
            decoder: RecordDecoder::new(),
            controller: SubscriptionController::new(settings.touchline),
            compression: settings.compression,
            login,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current subscriptions.
    #[must_use]
    pub const fn book(&self) -> &SubscriptionBook {
        self.controller.book()
    }

    /// Current pause state.
    #[must_use]
    pub const fn pause_state(&self) -> PauseState {
        self.controller.pause_state()
    }

    /// Number of control requests awaiting acknowledgement.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.controller.pending_count()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidState`] unless the session is disconnected.
    pub fn connect(&mut self) -> Result<(), FeedError> {
        self.transition(ConnectionState::Connecting)
    }

    /// The transport opened. Returns the framed login request to write
    /// before the returned `Open` event is dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidState`] unless the session is connecting,
    /// or [`FeedError::Outbound`] if the login cannot be framed.
    pub fn on_transport_open(&mut self) -> Result<(FeedEvent, Vec<u8>), FeedError> {
        self.transition(ConnectionState::Connected)?;
        tracing::info!(user_id = %self.login.user_id, "Session open, sending login");

        let login = self.login.encode(local_time());
        let frame = frame_outbound(login.as_bytes(), self.compression).map_err(FeedError::Outbound)?;
        Ok((FeedEvent::Open, frame))
    }

    /// Begin an orderly close. Any partially reassembled packet is dropped.
    ///
    /// Returns `false` when there is nothing to close.
    pub fn disconnect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.begin_closing();
                true
            }
            ConnectionState::Closing | ConnectionState::Disconnected => false,
        }
    }

    /// The transport is gone. Clears all session state and returns the
    /// `Close` event, or `None` if the session was already disconnected.
    pub fn on_transport_closed(&mut self, code: Option<u16>, reason: String) -> Option<FeedEvent> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        if self.state != ConnectionState::Closing {
            self.begin_closing();
        }

        self.state = ConnectionState::Disconnected;
        self.reassembler.reset();
        self.controller.reset();
        metrics::set_connection_state(self.state);
        metrics::set_subscriptions(&self.controller.book().stats());

        tracing::info!(code = ?code, reason = %reason, "Session closed");
        Some(FeedEvent::Close { code, reason })
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Process one inbound transport frame.
    pub fn on_frame(&mut self, frame: &[u8]) -> FrameOutcome {
        let started = Instant::now();
        metrics::record_frame_received(frame.len());

        let mut outcome = FrameOutcome::default();
        if !self.state.is_connected() {
            tracing::trace!(
                state = %self.state,
                len = frame.len(),
                "Dropping frame outside connected state"
            );
            return outcome;
        }

        self.reassembler.push(frame);
        loop {
            match self.reassembler.next_packet() {
                Ok(Some(packet)) => self.process_packet(&packet, &mut outcome.events),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Protocol violation, closing session");
                    metrics::record_protocol_violation();
                    outcome.events.push(FeedEvent::Error(FeedError::ProtocolViolation(e)));
                    self.begin_closing();
                    outcome.close = true;
                    break;
                }
            }
        }

        metrics::record_processing_duration(started.elapsed());
        outcome
    }

    fn process_packet(&mut self, packet: &Packet, events: &mut Vec<FeedEvent>) {
        metrics::record_packet(packet.encoding.as_str());

        let body = match self.decompressor.decompress(packet) {
            Ok(body) => body,
            Err(e) => return report_decode_error(e, events),
        };
        let messages = match split_messages(&body) {
            Ok(messages) => messages,
            Err(e) => return report_decode_error(e, events),
        };

        for message in messages {
            match self.decoder.decode_message(message) {
                Ok(records) => {
                    for record in records {
                        self.route_record(record, events);
                    }
                }
                Err(e) => report_decode_error(e, events),
            }
        }
    }

    fn route_record(&mut self, record: MarketRecord, events: &mut Vec<FeedEvent>) {
        metrics::record_record(record.kind());

        let follow_up = match &record {
            MarketRecord::Ack(ack) => self.handle_ack(ack),
            _ => None,
        };

        events.push(FeedEvent::Message(record));
        if let Some(error) = follow_up {
            events.push(FeedEvent::Error(error));
        }
    }

    fn handle_ack(&mut self, ack: &Ack) -> Option<FeedError> {
        if ack.message_code == code::LOGIN {
            return match &ack.status {
                AckStatus::Accepted => {
                    tracing::info!("Login accepted");
                    None
                }
                AckStatus::Rejected { code, reason } => {
                    tracing::warn!(code, reason = ?reason, "Login rejected");
                    Some(FeedError::LoginRejected {
                        code: *code,
                        reason: reason.clone(),
                    })
                }
            };
        }

        match self.controller.reconcile(ack) {
            AckOutcome::Confirmed(request_id) => {
                tracing::debug!(request_id = %request_id, "Control request confirmed");
                None
            }
            AckOutcome::Rejected(nack) => {
                tracing::warn!(nack = %nack, "Control request rejected, rolled back");
                metrics::record_negative_ack(nack.action);
                metrics::set_subscriptions(&self.controller.book().stats());
                Some(FeedError::NegativeAck(nack))
            }
            AckOutcome::Unmatched => {
                tracing::trace!(
                    request_id = ?ack.request_id,
                    message_code = ack.message_code,
                    "Acknowledgement matches no pending request"
                );
                None
            }
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Subscribe scrips under a mode.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotConnected`] outside the connected state,
    /// [`FeedError::Subscription`] for a bad scrip list and
    /// [`FeedError::Outbound`] if the request cannot be framed. State is
    /// unchanged on error.
    pub fn subscribe<S: AsRef<str>>(
        &mut self,
        scrips: &[S],
        mode: SubscriptionMode,
    ) -> Result<OutboundRequest, FeedError> {
        self.ensure_connected()?;
        let msg = self.controller.subscribe(scrips, mode)?;
        self.frame_control(&msg)
    }

    /// Unsubscribe scrips from a mode. `Ok(None)` when none of them were
    /// subscribed, in which case nothing is sent.
    ///
    /// # Errors
    ///
    /// Same as [`SessionCore::subscribe`].
    pub fn unsubscribe<S: AsRef<str>>(
        &mut self,
        scrips: &[S],
        mode: SubscriptionMode,
    ) -> Result<Option<OutboundRequest>, FeedError> {
        self.ensure_connected()?;
        match self.controller.unsubscribe(scrips, mode)? {
            Some(msg) => self.frame_control(&msg).map(Some),
            None => {
                tracing::debug!(mode = mode.as_str(), "Nothing to unsubscribe");
                Ok(None)
            }
        }
    }

    /// Pause (`true`) or resume (`false`) the broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotConnected`] outside the connected state,
    /// [`FeedError::Subscription`] while an opposite request is pending and
    /// [`FeedError::Outbound`] if the request cannot be framed.
    pub fn set_pause(&mut self, paused: bool) -> Result<OutboundRequest, FeedError> {
        self.ensure_connected()?;
        let msg = self.controller.set_pause(paused)?;
        self.frame_control(&msg)
    }

    /// Undo a request whose frame never reached the transport.
    pub fn abandon(&mut self, request_id: RequestId) -> Option<NegativeAck> {
        let undone = self.controller.rollback(request_id);
        if undone.is_some() {
            tracing::warn!(request_id = %request_id, "Control request not sent, rolled back");
            metrics::set_subscriptions(&self.controller.book().stats());
        }
        undone
    }

    fn frame_control(&mut self, msg: &ControlMessage) -> Result<OutboundRequest, FeedError> {
        let text = encode_control(msg, local_time());
        match frame_outbound(text.as_bytes(), self.compression) {
            Ok(frame) => {
                tracing::debug!(
                    request_id = %msg.request_id,
                    action = msg.action.as_str(),
                    mode = msg.mode.map_or("none", |m| m.as_str()),
                    scrips = msg.scrips.len(),
                    "Control request framed"
                );
                metrics::record_control_request(msg.action, msg.mode);
                metrics::set_subscriptions(&self.controller.book().stats());
                Ok(OutboundRequest {
                    request_id: msg.request_id,
                    frame,
                })
            }
            Err(e) => {
                self.controller.rollback(msg.request_id);
                Err(FeedError::Outbound(e))
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    const fn ensure_connected(&self) -> Result<(), FeedError> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(FeedError::NotConnected(self.state))
        }
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), FeedError> {
        self.state = self.state.transition(to)?;
        metrics::set_connection_state(self.state);
        Ok(())
    }

    fn begin_closing(&mut self) {
        self.state = ConnectionState::Closing;
        self.reassembler.reset();
        metrics::set_connection_state(self.state);
    }
}

fn report_decode_error(error: DecodeError, events: &mut Vec<FeedEvent>) {
    tracing::warn!(error = %error, kind = error.kind(), "Dropping undecodable message");
    metrics::record_decode_error(error.kind());
    events.push(FeedEvent::Error(FeedError::Decode(error)));
}

// =============================================================================
// Tests
// =============================================================================
