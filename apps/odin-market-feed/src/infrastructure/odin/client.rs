//! Feed Client
//!
//! Async session orchestrator. One Tokio task owns the [`SessionCore`] and the
//! transport; everything else talks to it over channels.
//!
//! # Design
//!
//! ```text
//! FeedClient ──Command──► session task ──FeedEvent──► consumer
//!     ▲                      │    ▲
//!     └──── oneshot reply ───┘    └── transport frames
//! ```
//!
//! - The task selects over cancellation, commands and transport reads, so
//!   frame processing and control calls never run concurrently
//! - Events are sent with `.await` and reach the consumer in session order
//! - Control calls return once the request is written, not when it is
//!   acknowledged; rejections arrive later as `FeedEvent::Error`
//! - A read-only [`SessionSnapshot`] is published after every step
//!
//! A consumer that stops draining the event channel while awaiting a control
//! call can stall the session once the channel is full.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    Endpoint, FeedConnector, FeedEvent, FeedTransport, TransportError, TransportFrame,
};
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::{PauseState, SubscriptionMode, SubscriptionStats};
use crate::error::FeedError;
use crate::infrastructure::config::FeedConfig;

use super::messages::LoginRequest;
use super::session::{OutboundRequest, SessionCore};

/// Close code reported after a client-initiated disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

// =============================================================================
// Snapshot
// =============================================================================

/// Read-only view of the session, updated by the session task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Subscription counts.
    pub subscriptions: SubscriptionStats,
    /// Pause state.
    pub pause: PauseState,
    /// Control requests awaiting acknowledgement.
    pub pending_requests: usize,
}

type SharedSnapshot = Arc<parking_lot::RwLock<SessionSnapshot>>;

// =============================================================================
// Commands
// =============================================================================

type Reply<T> = oneshot::Sender<Result<T, FeedError>>;

#[derive(Debug)]
enum Command {
    Subscribe {
        scrips: Vec<String>,
        mode: SubscriptionMode,
        reply: Reply<()>,
    },
    Unsubscribe {
        scrips: Vec<String>,
        mode: SubscriptionMode,
        reply: Reply<bool>,
    },
    SetPause {
        paused: bool,
        reply: Reply<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Client Handle
// =============================================================================

/// Handle to a running feed session.
///
/// Dropping the handle closes the session.
#[derive(Debug)]
pub struct FeedClient {
    commands: mpsc::Sender<Command>,
    snapshot: SharedSnapshot,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FeedClient {
    /// Start a session and return its handle and event stream.
    ///
    /// Connection happens in the background; the first event is either
    /// `Open` or an `Error` followed by `Close`. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the configuration is invalid.
    pub fn connect(
        connector: Arc<dyn FeedConnector>,
        config: &FeedConfig,
    ) -> Result<(Self, mpsc::Receiver<FeedEvent>), FeedError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(config.channels.command_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.channels.event_capacity);
        let snapshot = SharedSnapshot::default();
        let cancel = CancellationToken::new();

        let login = LoginRequest {
            user_id: config.credentials.user_id().to_string(),
            api_key: config.credentials.api_key().map(str::to_string),
        };

        let actor = SessionActor {
            core: SessionCore::new(&config.session, login),
            connector,
            endpoint: config.endpoint.clone(),
            commands: command_rx,
            events: event_tx,
            snapshot: Arc::clone(&snapshot),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run());

        Ok((
            Self {
                commands: command_tx,
                snapshot,
                cancel,
                task: Some(task),
            },
            event_rx,
        ))
    }

    /// Subscribe scrips (`segment_token`) under a mode.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotConnected`] unless the session is connected,
    /// [`FeedError::Subscription`] for an empty or malformed list and
    /// [`FeedError::Transport`] if the request could not be written.
    pub async fn subscribe<S: AsRef<str>>(
        &self,
        scrips: &[S],
        mode: SubscriptionMode,
    ) -> Result<(), FeedError> {
        let scrips = to_owned(scrips);
        self.request(|reply| Command::Subscribe {
            scrips,
            mode,
            reply,
        })
        .await
    }

    /// Unsubscribe scrips from a mode.
    ///
    /// Returns `false` when none of them were subscribed and nothing was sent.
    ///
    /// # Errors
    ///
    /// Same as [`FeedClient::subscribe`].
    pub async fn unsubscribe<S: AsRef<str>>(
        &self,
        scrips: &[S],
        mode: SubscriptionMode,
    ) -> Result<bool, FeedError> {
        let scrips = to_owned(scrips);
        self.request(|reply| Command::Unsubscribe {
            scrips,
            mode,
            reply,
        })
        .await
    }

    /// Ask the server to pause the broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Subscription`] while a resume is pending, plus the
    /// errors of [`FeedClient::subscribe`].
    pub async fn pause(&self) -> Result<(), FeedError> {
        self.request(|reply| Command::SetPause {
            paused: true,
            reply,
        })
        .await
    }

    /// Ask the server to resume the broadcast.
    ///
    /// # Errors
    ///
    /// See [`FeedClient::pause`].
    pub async fn resume(&self) -> Result<(), FeedError> {
        self.request(|reply| Command::SetPause {
            paused: false,
            reply,
        })
        .await
    }

    /// Close the session. Safe to call in any state, including mid-packet.
    ///
    /// Returns after the `Close` event has been queued.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Latest session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.read()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.snapshot.read().state
    }

    /// Wait for the session task to finish.
    pub async fn closed(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Session task failed");
            }
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, FeedError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| FeedError::NotConnected(ConnectionState::Disconnected))?;
        response
            .await
            .map_err(|_| FeedError::NotConnected(ConnectionState::Disconnected))?
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn to_owned<S: AsRef<str>>(scrips: &[S]) -> Vec<String> {
    scrips.iter().map(|s| s.as_ref().to_string()).collect()
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionActor {
    core: SessionCore,
    connector: Arc<dyn FeedConnector>,
    endpoint: Endpoint,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<FeedEvent>,
    snapshot: SharedSnapshot,
    cancel: CancellationToken,
}

enum Flow {
    Continue,
    Stop,
}

impl SessionActor {
    async fn run(mut self) {
        if let Err(e) = self.core.connect() {
            self.emit(FeedEvent::Error(e)).await;
            return;
        }
        self.publish();

        let Some(mut transport) = self.open().await else {
            return;
        };

        match self.core.on_transport_open() {
            Ok((open, login)) => {
                if let Err(e) = transport.send(login).await {
                    let reason = e.to_string();
                    self.emit(FeedEvent::Error(e.into())).await;
                    self.abort(transport.as_mut(), reason).await;
                    return;
                }
                self.publish();
                self.emit(open).await;
            }
            Err(e) => {
                self.emit(FeedEvent::Error(e)).await;
                self.shutdown(transport.as_mut(), "login could not be sent").await;
                return;
            }
        }

        self.pump(transport.as_mut()).await;
    }

    /// Wait for the connector while answering commands.
    async fn open(&mut self) -> Option<Box<dyn FeedTransport>> {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let connect = async move { connector.connect(&endpoint).await };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.core.disconnect();
                    self.finish(None, "cancelled while connecting".to_string()).await;
                    return None;
                }
                result = &mut connect => match result {
                    Ok(transport) => return Some(transport),
                    Err(e) => {
                        tracing::warn!(error = %e, "Feed connection failed");
                        let reason = e.to_string();
                        self.emit(FeedEvent::Error(e.into())).await;
                        self.finish(None, reason).await;
                        return None;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect { reply }) => {
                        self.core.disconnect();
                        self.finish(Some(NORMAL_CLOSURE), "client disconnect".to_string()).await;
                        let _ = reply.send(());
                        return None;
                    }
                    Some(command) => self.reject(command),
                    None => {
                        self.core.disconnect();
                        self.finish(None, "client dropped".to_string()).await;
                        return None;
                    }
                },
            }
        }
    }

    async fn pump(&mut self, transport: &mut dyn FeedTransport) {
        loop {
            let flow = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.shutdown(transport, "cancelled").await;
                    Flow::Stop
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command, transport).await,
                    None => {
                        self.shutdown(transport, "client dropped").await;
                        Flow::Stop
                    }
                },
                frame = transport.recv() => self.on_transport(frame).await,
            };

            self.publish();
            if matches!(flow, Flow::Stop) {
                if self.core.state() != ConnectionState::Disconnected {
                    self.shutdown(transport, "protocol violation").await;
                }
                return;
            }
        }
    }

    async fn on_transport(
        &mut self,
        frame: Option<Result<TransportFrame, TransportError>>,
    ) -> Flow {
        match frame {
            Some(Ok(TransportFrame::Binary(bytes))) => {
                let outcome = self.core.on_frame(&bytes);
                self.publish();
                for event in outcome.events {
                    self.emit(event).await;
                }
                if outcome.close { Flow::Stop } else { Flow::Continue }
            }
            Some(Ok(TransportFrame::Closed { code, reason })) => {
                self.finish(code, reason).await;
                Flow::Stop
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Transport error");
                let reason = e.to_string();
                self.emit(FeedEvent::Error(e.into())).await;
                self.finish(None, reason).await;
                Flow::Stop
            }
            None => {
                tracing::info!("Transport stream ended");
                self.finish(None, "transport stream ended".to_string()).await;
                Flow::Stop
            }
        }
    }

    async fn handle(&mut self, command: Command, transport: &mut dyn FeedTransport) -> Flow {
        match command {
            Command::Subscribe {
                scrips,
                mode,
                reply,
            } => match self.core.subscribe(&scrips, mode) {
                Ok(request) => self.write(transport, request, reply, ()).await,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Flow::Continue
                }
            },
            Command::Unsubscribe {
                scrips,
                mode,
                reply,
            } => match self.core.unsubscribe(&scrips, mode) {
                Ok(Some(request)) => self.write(transport, request, reply, true).await,
                Ok(None) => {
                    let _ = reply.send(Ok(false));
                    Flow::Continue
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Flow::Continue
                }
            },
            Command::SetPause { paused, reply } => match self.core.set_pause(paused) {
                Ok(request) => self.write(transport, request, reply, ()).await,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Flow::Continue
                }
            },
            Command::Disconnect { reply } => {
                self.shutdown(transport, "client disconnect").await;
                let _ = reply.send(());
                Flow::Stop
            }
        }
    }

    /// Write a framed request. A failed write rolls the request back and
    /// ends the session.
    async fn write<T>(
        &mut self,
        transport: &mut dyn FeedTransport,
        request: OutboundRequest,
        reply: Reply<T>,
        value: T,
    ) -> Flow {
        match transport.send(request.frame).await {
            Ok(()) => {
                self.publish();
                let _ = reply.send(Ok(value));
                Flow::Continue
            }
            Err(e) => {
                self.core.abandon(request.request_id);
                let reason = e.to_string();
                let _ = reply.send(Err(e.into()));
                self.abort(transport, reason).await;
                Flow::Stop
            }
        }
    }

    fn reject(&self, command: Command) {
        let error = FeedError::NotConnected(self.core.state());
        match command {
            Command::Subscribe { reply, .. } | Command::SetPause { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Unsubscribe { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Close the transport and report the session closed.
    async fn shutdown(&mut self, transport: &mut dyn FeedTransport, reason: &str) {
        self.core.disconnect();
        close_transport(transport).await;
        self.finish(Some(NORMAL_CLOSURE), reason.to_string()).await;
    }

    /// Close the transport after a failed write. No close code is reported.
    async fn abort(&mut self, transport: &mut dyn FeedTransport, reason: String) {
        self.core.disconnect();
        close_transport(transport).await;
        self.finish(None, reason).await;
    }

    async fn finish(&mut self, code: Option<u16>, reason: String) {
        let closed = self.core.on_transport_closed(code, reason);
        self.publish();
        if let Some(event) = closed {
            self.emit(event).await;
        }
    }

    async fn emit(&self, event: FeedEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped");
        }
    }

    fn publish(&self) {
        let book = self.core.book();
        *self.snapshot.write() = SessionSnapshot {
            state: self.core.state(),
            subscriptions: book.stats(),
            pause: self.core.pause_state(),
            pending_requests: self.core.pending_requests(),
        };
    }
}

async fn close_transport(transport: &mut dyn FeedTransport) {
    if let Err(e) = transport.close().await {
        tracing::debug!(error = %e, "Transport close failed");
    }
}
