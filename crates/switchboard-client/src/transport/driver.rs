//! The driver task.
//!
//! One tokio task per session owns the socket, the outbound queue, the
//! metrics and the [`Link`] state machine. It selects over application
//! commands, socket reads, the pending connect and token refresh, and its
//! timers, feeds every outcome to [`Link::step`] and performs the effects.

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use switchboard_audit::AuditSink;
use switchboard_proto::{ControlFrame, Frame, Message, CLOSE_NORMAL};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::heartbeat::{Heartbeat, HeartbeatConfig, Tick};
use super::machine::{Effect, Input, Link, LinkState};
use crate::auth::SharedTokenSource;
use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ClientError, Result};
use crate::events::SessionEvent;
use crate::metrics::{ConnectionMetrics, ConnectionState, ConnectionStatus};
use crate::queue::PriorityQueue;

/// How long to wait for the peer's close frame after sending ours.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the session to its driver.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect {
        code: u16,
        reason: String,
    },
    Send {
        message: Message,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Drop a still-queued message, e.g. a request nobody waits for anymore.
    Withdraw {
        id: String,
    },
    Shutdown,
}

enum ConnectOutcome {
    Opened(Box<WsStream>),
    Failed(String),
    TimedOut,
}

/// Channels the driver publishes on.
pub(crate) struct Outputs {
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
}

/// Collaborators injected by the session builder.
pub(crate) struct Collaborators {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) token_source: Option<SharedTokenSource>,
    pub(crate) audit: Arc<dyn AuditSink>,
}

pub(crate) struct Driver {
    config: SessionConfig,
    link: Link,
    metrics: ConnectionMetrics,
    queue: PriorityQueue,
    heartbeat: Heartbeat,
    collaborators: Collaborators,
    outputs: Outputs,
    commands: mpsc::Receiver<Command>,

    socket: Option<WsStream>,
    peer_close: Option<(Option<u16>, String)>,
    connecting: Option<BoxFuture<'static, ConnectOutcome>>,
    refreshing: Option<BoxFuture<'static, Option<String>>>,
    heartbeat_timer: Option<Interval>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    close_deadline: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    pub(crate) fn new(
        config: SessionConfig,
        collaborators: Collaborators,
        outputs: Outputs,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let link = Link::new(
            config.reconnect_config(),
            config.token.clone(),
            collaborators.token_source.is_some(),
        );
        let heartbeat = Heartbeat::new(HeartbeatConfig {
            interval: config.heartbeat_interval(),
            max_missed: config.max_missed_heartbeats,
        });
        Self {
            metrics: ConnectionMetrics::new(config.latency_window),
            queue: PriorityQueue::new(config.queue_capacity),
            link,
            heartbeat,
            collaborators,
            outputs,
            commands,
            config,
            socket: None,
            peer_close: None,
            connecting: None,
            refreshing: None,
            heartbeat_timer: None,
            reconnect_timer: None,
            close_deadline: None,
        }
    }

    /// Run until the session shuts down or is dropped.
    pub(crate) async fn run(mut self) {
        debug!(url = %self.config.url, "driver started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                token = poll_slot(&mut self.refreshing) => {
                    self.refreshing = None;
                    self.step(Input::TokenRefreshed(token)).await;
                }
                outcome = poll_slot(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_outcome(outcome).await;
                }
                item = next_message(&mut self.socket) => self.on_socket(item).await,
                () = tick(&mut self.heartbeat_timer) => self.on_heartbeat().await,
                () = poll_slot(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.step(Input::BackoffElapsed).await;
                }
                () = poll_slot(&mut self.close_deadline) => {
                    self.close_deadline = None;
                    warn!("peer did not complete the close handshake");
                    self.discard_socket();
                    self.step(Input::Closed {
                        code: None,
                        reason: "close handshake timed out".to_string(),
                    })
                    .await;
                }
            }
        }
        self.shutdown().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.step(Input::Connect).await,
            Command::Disconnect { code, reason } => {
                info!(code, reason = %reason, "disconnect requested");
                self.step(Input::Disconnect { code, reason }).await;
            }
            Command::Send { message, reply } => {
                let result = self.send(message).await;
                // The caller may have stopped waiting.
                let _ = reply.send(result);
            }
            Command::Withdraw { id } => {
                if self.queue.remove(&id) {
                    debug!(id = %id, "withdrew queued message");
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Transmit now when connected, otherwise queue.
    async fn send(&mut self, mut message: Message) -> Result<()> {
        if !self.link.is_open() || self.socket.is_none() {
            trace!(kind = %message.kind, id = %message.id, "queueing message while offline");
            return self.enqueue(message);
        }

        let text = message.to_json()?;
        match self.write_text(text).await {
            Ok(()) => {
                trace!(kind = %message.kind, id = %message.id, "sent message");
                self.publish();
                Ok(())
            }
            Err(failure) => {
                message.retry_count += 1;
                let queued = self.enqueue(message);
                self.step(Input::SocketError(failure)).await;
                queued
            }
        }
    }

    fn enqueue(&mut self, message: Message) -> Result<()> {
        let evicted_before = self.queue.evicted();
        if !self.queue.enqueue(message) {
            warn!(capacity = self.queue.capacity(), "outbound queue full");
            return Err(ClientError::QueueFull {
                capacity: self.queue.capacity(),
            });
        }
        if self.queue.evicted() > evicted_before {
            self.metrics.record_eviction();
        }
        self.publish();
        Ok(())
    }

    async fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        match outcome {
            ConnectOutcome::Opened(socket) => {
                info!(url = %self.config.url, "socket opened");
                self.socket = Some(*socket);
                self.peer_close = None;
                self.step(Input::Opened).await;
            }
            ConnectOutcome::Failed(reason) => {
                warn!(error = %reason, "connection attempt failed");
                self.step(Input::SocketError(reason)).await;
            }
            ConnectOutcome::TimedOut => {
                warn!(
                    timeout_ms = self.config.connect_timeout_ms,
                    "connection attempt timed out"
                );
                self.step(Input::OpenTimedOut).await;
            }
        }
    }

    async fn on_socket(&mut self, item: Option<std::result::Result<WsMessage, WsError>>) {
        match item {
            Some(Ok(WsMessage::Text(text))) => {
                self.metrics.record_received(text.len());
                match Frame::from_json(&text) {
                    Ok(frame) => self.on_frame(frame).await,
                    Err(e) => warn!(error = %e, "dropping undecodable text frame"),
                }
                self.publish();
            }
            Some(Ok(WsMessage::Binary(bytes))) => {
                self.metrics.record_received(bytes.len());
                match Frame::from_bytes(&bytes) {
                    Ok(frame) => self.on_frame(frame).await,
                    Err(e) => warn!(error = %e, "dropping undecodable binary frame"),
                }
                self.publish();
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let close = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.to_string())
                });
                debug!(code = ?close.0, reason = %close.1, "peer sent close");
                self.peer_close = Some(close);
            }
            // Protocol-level ping/pong is answered by tungstenite.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let close = self.peer_close.take();
                self.discard_socket();
                match close {
                    Some((code, reason)) => self.step(Input::Closed { code, reason }).await,
                    None => {
                        warn!(error = %e, "socket error");
                        self.step(Input::SocketError(e.to_string())).await;
                    }
                }
            }
            None => {
                let (code, reason) = self
                    .peer_close
                    .take()
                    .unwrap_or_else(|| (None, "connection closed".to_string()));
                self.discard_socket();
                info!(code = ?code, reason = %reason, "socket closed");
                self.step(Input::Closed { code, reason }).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        trace!(kind = %frame.kind, id = %frame.id, "received frame");
        match ControlFrame::parse(&frame) {
            Some(ControlFrame::Ping { .. }) => {
                let pong = ControlFrame::pong(frame.payload);
                if let Err(failure) = self.write_frame(&pong).await {
                    self.step(Input::SocketError(failure)).await;
                }
            }
            Some(ControlFrame::Pong { timestamp }) => {
                if let Some(latency) = self.heartbeat.pong(timestamp) {
                    trace!(latency_ms = latency, "heartbeat round trip");
                    self.metrics.record_latency(latency);
                }
            }
            Some(ControlFrame::AuthSuccess) => {
                info!("authenticated");
                self.step(Input::AuthSucceeded).await;
            }
            Some(ControlFrame::AuthFailed { reason }) => {
                let reason = reason.unwrap_or_else(|| "authentication failed".to_string());
                warn!(reason = %reason, "server rejected token");
                self.step(Input::AuthFailed { reason }).await;
            }
            Some(ControlFrame::AuthRequired) => {
                info!("server requested a fresh token");
                self.step(Input::AuthRequired).await;
            }
            Some(ControlFrame::Auth { .. }) => debug!("ignoring auth frame from server"),
            None => self.collaborators.dispatcher.dispatch(frame),
        }
    }

    async fn on_heartbeat(&mut self) {
        match self.heartbeat.tick() {
            Tick::Ping(ping) => {
                trace!("sending heartbeat");
                if let Err(failure) = self.write_frame(&ping).await {
                    self.step(Input::SocketError(failure)).await;
                }
            }
            Tick::Dead { missed } => {
                warn!(missed, "heartbeat unanswered");
                self.step(Input::HeartbeatTimedOut).await;
            }
        }
        self.publish();
    }

    /// Feed an input to the state machine and perform the resulting effects,
    /// including any inputs those effects produce.
    async fn step(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            trace!(input = ?input, state = ?self.link.state(), "link input");
            for effect in self.link.step(input) {
                if let Some(next) = self.apply(effect).await {
                    inputs.push_back(next);
                }
            }
        }
        // The close grace timer lives exactly as long as the Closing state.
        if !matches!(self.link.state(), LinkState::Closing { .. }) {
            self.close_deadline = None;
        }
        self.publish();
    }

    async fn apply(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::SetStatus(status) => self.set_status(status),
            Effect::SetAttempts(attempts) => self.metrics.set_reconnect_attempts(attempts),
            Effect::RefreshToken => match &self.collaborators.token_source {
                Some(source) => {
                    debug!("refreshing token");
                    self.refreshing = Some(source.refresh());
                }
                None => return Some(Input::TokenRefreshed(None)),
            },
            Effect::BeginConnect { token } => {
                return self.begin_connect(token.as_deref());
            }
            Effect::AbortConnect => {
                self.connecting = None;
                self.refreshing = None;
            }
            Effect::SendAuth(token) => {
                debug!("sending auth frame");
                if let Err(failure) = self.write_frame(&ControlFrame::auth(&token)).await {
                    return Some(Input::SocketError(failure));
                }
            }
            Effect::StartHeartbeat => {
                let period = self.heartbeat.interval();
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat.reset();
                self.heartbeat_timer = Some(timer);
            }
            Effect::StopHeartbeat => self.heartbeat_timer = None,
            Effect::FlushQueue => return self.flush_queue().await,
            Effect::ScheduleReconnect { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
            }
            Effect::CancelReconnect => self.reconnect_timer = None,
            Effect::CloseSocket { code, reason } => return self.close_socket(code, reason).await,
            Effect::DropSocket => self.discard_socket(),
            Effect::RecordError(message) => {
                warn!(error = %message, "transport error");
                self.metrics.record_error(message);
            }
            Effect::Notify(event) => {
                // No receivers is fine.
                let _ = self.outputs.events.send(event);
            }
            Effect::Audit(event) => {
                let event = event.with_client_id(self.config.client_id.clone());
                self.collaborators.audit.log(&event);
            }
        }
        None
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        let previous = self.metrics.status();
        if previous == status {
            return;
        }
        self.metrics.set_status(status);
        info!(from = %previous, to = %status, "connection status changed");
        let _ = self
            .outputs
            .events
            .send(SessionEvent::StatusChanged(status));
    }

    fn begin_connect(&mut self, token: Option<&str>) -> Option<Input> {
        let url = match connection_url(&self.config, token) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "cannot build connection url");
                return Some(Input::SocketError(e.to_string()));
            }
        };
        info!(
            url = %self.config.url,
            attempt = self.link.attempts(),
            "connecting"
        );

        let timeout = self.config.connect_timeout();
        let request = url.to_string();
        self.connecting = Some(
            async move {
                match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await
                {
                    Ok(Ok((socket, _))) => ConnectOutcome::Opened(Box::new(socket)),
                    Ok(Err(e)) => ConnectOutcome::Failed(e.to_string()),
                    Err(_) => ConnectOutcome::TimedOut,
                }
            }
            .boxed(),
        );
        None
    }

    /// Write the queue to the socket in drain order.
    ///
    /// On a write failure the unsent remainder goes back to the front of its
    /// lanes and the failure is returned as an input.
    async fn flush_queue(&mut self) -> Option<Input> {
        let mut pending: VecDeque<Message> = self.queue.drain().into();
        if pending.is_empty() {
            return None;
        }
        debug!(count = pending.len(), "flushing queued messages");

        while let Some(mut message) = pending.pop_front() {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(id = %message.id, error = %e, "dropping unencodable message");
                    continue;
                }
            };
            if let Err(failure) = self.write_text(text).await {
                message.retry_count += 1;
                pending.push_front(message);
                for message in pending.into_iter().rev() {
                    self.queue.requeue_front(message);
                }
                return Some(Input::SocketError(failure));
            }
        }
        None
    }

    async fn close_socket(&mut self, code: u16, reason: String) -> Option<Input> {
        let Some(socket) = self.socket.as_mut() else {
            return Some(Input::Closed {
                code: Some(code),
                reason,
            });
        };

        debug!(code, reason = %reason, "closing socket");
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.clone().into(),
        };
        if let Err(e) = socket.close(Some(frame)).await {
            debug!(error = %e, "close frame not delivered");
            self.discard_socket();
            return Some(Input::Closed {
                code: Some(code),
                reason,
            });
        }
        self.close_deadline = Some(Box::pin(sleep(CLOSE_GRACE)));
        None
    }

    async fn write_frame(&mut self, frame: &Frame) -> std::result::Result<(), String> {
        match frame.to_json() {
            Ok(text) => self.write_text(text).await,
            Err(e) => {
                error!(kind = %frame.kind, error = %e, "dropping unencodable frame");
                Ok(())
            }
        }
    }

    async fn write_text(&mut self, text: String) -> std::result::Result<(), String> {
        let Some(socket) = self.socket.as_mut() else {
            return Err("socket not open".to_string());
        };
        let bytes = text.len();
        match socket.send(WsMessage::Text(text.into())).await {
            Ok(()) => {
                self.metrics.record_sent(bytes);
                Ok(())
            }
            Err(e) => {
                self.discard_socket();
                Err(e.to_string())
            }
        }
    }

    fn discard_socket(&mut self) {
        self.socket = None;
    }

    fn publish(&self) {
        let snapshot = self.metrics.snapshot();
        self.outputs.state.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn shutdown(&mut self) {
        debug!("driver stopping");
        self.connecting = None;
        self.refreshing = None;
        self.heartbeat_timer = None;
        self.reconnect_timer = None;
        if let Some(socket) = self.socket.as_mut() {
            let frame = CloseFrame {
                code: CloseCode::from(CLOSE_NORMAL),
                reason: "session closed".into(),
            };
            if let Err(e) = socket.close(Some(frame)).await {
                debug!(error = %e, "close frame not delivered");
            }
        }
        self.discard_socket();
        self.close_deadline = None;
        if !self.queue.is_empty() {
            debug!(count = self.queue.len(), "discarding queued messages");
            self.queue.clear();
        }
        self.set_status(ConnectionStatus::Disconnected);
        self.publish();
    }
}

/// The configured URL with `clientId`, `version` and `token` query parameters.
///
/// # Errors
///
/// Returns an error if the configured URL does not parse.
pub fn connection_url(config: &SessionConfig, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(&config.url)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("clientId", &config.client_id);
        query.append_pair("version", &config.client_version);
        if let Some(token) = token {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

async fn poll_slot<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<std::result::Result<WsMessage, WsError>> {
    match socket {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending::<()>().await,
    }
}
