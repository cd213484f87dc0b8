//! Application-facing session API.
//!
//! A [`Session`] is an owned handle to one driver task. Dropping it (or
//! calling [`Session::close`]) closes the socket and stops the task; sessions
//! share nothing, so several can run side by side.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_audit::{AuditSink, TracingAuditSink};
use switchboard_proto::Message;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::{SharedTokenSource, TokenSource};
use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, Subscription};
use crate::error::{ClientError, Result};
use crate::events::SessionEvent;
use crate::metrics::{ConnectionState, ConnectionStatus};
use crate::transport::driver::{Collaborators, Command, Driver, Outputs};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Builder for a [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    token_source: Option<SharedTokenSource>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("token_source", &self.token_source.is_some())
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

impl SessionBuilder {
    /// Start building a session with the given configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            token_source: None,
            audit: None,
        }
    }

    /// Refresh the token through this source before every connection
    /// attempt and whenever the server asks for one.
    #[must_use]
    pub fn token_source(mut self, source: impl TokenSource + 'static) -> Self {
        self.token_source = Some(Arc::new(source));
        self
    }

    /// Report reconnects, abnormal closures and auth failures to this sink.
    ///
    /// Defaults to [`TracingAuditSink`].
    #[must_use]
    pub fn audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(sink));
        self
    }

    /// Validate the configuration and spawn the driver task.
    ///
    /// The session starts disconnected; call [`Session::connect`].
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let dispatcher = Dispatcher::new();
        let request_timeout = self.config.request_timeout();

        let driver = Driver::new(
            self.config,
            Collaborators {
                dispatcher: dispatcher.clone(),
                token_source: self.token_source,
                audit: self
                    .audit
                    .unwrap_or_else(|| Arc::new(TracingAuditSink::new())),
            },
            Outputs {
                state: state_tx,
                events: event_tx.clone(),
            },
            command_rx,
        );
        let task = tokio::spawn(driver.run());

        Ok(Session {
            commands: command_tx,
            dispatcher,
            state: state_rx,
            events: event_tx,
            request_timeout,
            task: Some(task),
        })
    }
}

/// A real-time session.
#[derive(Debug)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    dispatcher: Dispatcher,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    request_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Build a session with default collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SessionConfig) -> Result<Self> {
        SessionBuilder::new(config).build()
    }

    /// Start connecting. A no-op while connecting, connected or backing off.
    ///
    /// Progress is reported through [`Session::watch_state`] and
    /// [`Session::events`]; connection failures are never returned here.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionClosed`] if the driver has stopped.
    pub async fn connect(&self) -> Result<()> {
        self.command(Command::Connect).await
    }

    /// Close the connection and stop reconnecting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionClosed`] if the driver has stopped.
    pub async fn disconnect(&self, code: u16, reason: impl Into<String>) -> Result<()> {
        self.command(Command::Disconnect {
            code,
            reason: reason.into(),
        })
        .await
    }

    /// Send a message: immediately when connected, otherwise queued until
    /// the next connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::QueueFull`] if the message had to be queued and
    /// the queue is full of normal- and high-priority messages.
    pub async fn send(&self, message: Message) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { message, reply }).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Call `handler` for every inbound message of type `kind`.
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    /// Send a correlated request and wait for its `<kind>_response`.
    ///
    /// The payload gains a `requestId` field and is sent at high priority.
    /// `timeout` defaults to the configured request timeout; a request that
    /// times out while still queued is withdrawn from the queue. Dropping the
    /// returned future abandons the request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RequestTimeout`] if no response arrives in
    /// time, or [`ClientError::QueueFull`] if the request could not be queued.
    pub async fn request(
        &self,
        kind: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (message, pending) = self.dispatcher.begin_request(kind, payload);
        let id = pending.id().to_string();
        debug!(kind, request_id = %id, "sending request");
        self.send(message).await?;

        let result = pending.wait(timeout.unwrap_or(self.request_timeout)).await;
        if matches!(result, Err(ClientError::RequestTimeout { .. })) {
            // A request that timed out offline must not go out on reconnect.
            let _ = self.commands.send(Command::Withdraw { id }).await;
        }
        result
    }

    /// A copy of the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every connection state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The dispatcher backing [`Session::subscribe`] and [`Session::request`].
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Wait until the connection reaches `status`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StatusTimeout`] if it does not within `timeout`.
    pub async fn wait_for_status(
        &self,
        status: ConnectionStatus,
        timeout: Duration,
    ) -> Result<ConnectionState> {
        let mut rx = self.state.clone();
        match tokio::time::timeout(timeout, rx.wait_for(|s| s.status == status)).await {
            Ok(Ok(state)) => Ok(state.clone()),
            Ok(Err(_)) => Err(ClientError::SessionClosed),
            Err(_) => Err(ClientError::StatusTimeout { status, timeout }),
        }
    }

    /// Close the connection with the normal code and wait for the driver
    /// task to stop. Queued messages are discarded.
    pub async fn close(mut self) {
        // A stopped driver has nothing left to close.
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "driver task ended abnormally");
            }
        }
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_audit::NoopAuditSink;
    use switchboard_proto::Priority;

    fn offline_config(capacity: usize) -> SessionConfig {
        let mut config = SessionConfig::new("ws://127.0.0.1:9/unused");
        config.queue_capacity = capacity;
        config
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = SessionBuilder::new(SessionConfig::new("http://nope")).build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let session = SessionBuilder::new(offline_config(10))
            .audit_sink(NoopAuditSink::new())
            .build()
            .unwrap();
        let state = session.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_queues_until_full() {
        let session = SessionBuilder::new(offline_config(2))
            .audit_sink(NoopAuditSink::new())
            .build()
            .unwrap();

        let high = |kind: &str| Message::new(kind, json!({})).with_priority(Priority::High);
        session.send(high("a")).await.unwrap();
        session.send(high("b")).await.unwrap();

        let result = session.send(high("c")).await;
        assert!(matches!(result, Err(ClientError::QueueFull { capacity: 2 })));
        session.close().await;
    }

    #[tokio::test]
    async fn test_eviction_is_counted() {
        let session = SessionBuilder::new(offline_config(1))
            .audit_sink(NoopAuditSink::new())
            .build()
            .unwrap();

        let low = |kind: &str| Message::new(kind, json!({})).with_priority(Priority::Low);
        session.send(low("a")).await.unwrap();
        session.send(low("b")).await.unwrap();

        assert_eq!(session.state().messages_evicted, 1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_request_while_offline_times_out_and_cleans_up() {
        let session = SessionBuilder::new(offline_config(10))
            .audit_sink(NoopAuditSink::new())
            .build()
            .unwrap();

        let result = session
            .request("get_contact", json!({"id": 1}), Some(Duration::from_millis(100)))
            .await;

        assert!(matches!(result, Err(ClientError::RequestTimeout { .. })));
        assert_eq!(session.dispatcher().pending_requests(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_timed_out_request_leaves_the_queue() {
        let session = SessionBuilder::new(offline_config(1))
            .audit_sink(NoopAuditSink::new())
            .build()
            .unwrap();

        let result = session
            .request("get_contact", json!({}), Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(ClientError::RequestTimeout { .. })));

        // The single slot is free again, so a high-priority send fits.
        let high = Message::new("typing", json!({})).with_priority(Priority::High);
        session.send(high).await.unwrap();
        assert_eq!(session.state().messages_evicted, 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_wait_for_status_times_out() {
        let session = Session::new(offline_config(10)).unwrap();
        let result = session
            .wait_for_status(ConnectionStatus::Connected, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ClientError::StatusTimeout { .. })));
        session.close().await;
    }

    #[tokio::test]
    async fn test_commands_fail_after_driver_stops() {
        let mut session = Session::new(offline_config(10)).unwrap();
        let _ = session.commands.send(Command::Shutdown).await;
        if let Some(task) = session.task.take() {
            task.await.unwrap();
        }
        assert!(matches!(session.connect().await, Err(ClientError::SessionClosed)));
    }
}
