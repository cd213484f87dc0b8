//! Inbound frame routing and request/response correlation.
//!
//! The [`Dispatcher`] is shared between the session and its driver task. The
//! driver hands it every application frame; subscribers registered for the
//! frame's type are called in turn, and `<type>_response` frames resolve the
//! matching pending request. The registry lock is never held while a
//! handler runs.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use switchboard_proto::control::{is_reserved, is_response, response_type, REQUEST_ID_FIELD};
use switchboard_proto::{generate_id, Frame, Message, Priority};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::error::{ClientError, Result};

/// Callback invoked for each inbound message of a subscribed type.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// A request awaiting its correlated response.
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation id, also the id of the request message.
    pub id: String,
    /// Request message type.
    pub kind: String,
    /// Payload as sent, including the correlation id.
    pub payload: Value,
    /// When the request was registered.
    pub timestamp: DateTime<Utc>,
    responder: oneshot::Sender<Value>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<String, Vec<(u64, Handler)>>,
    pending: HashMap<String, PendingRequest>,
    next_subscriber: u64,
}

/// Routes inbound frames to subscribers and pending requests.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("Dispatcher")
            .field("subscribed_types", &registry.subscribers.len())
            .field("pending_requests", &registry.pending.len())
            .finish()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let kind = kind.into();
        if is_reserved(&kind) {
            warn!(kind = %kind, "subscribing to a reserved type; it is never delivered");
        }

        let mut registry = self.registry.lock();
        registry.next_subscriber += 1;
        let id = registry.next_subscriber;
        registry
            .subscribers
            .entry(kind.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(kind = %kind, subscriber = id, "subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
            active: true,
        }
    }

    /// Number of handlers registered for a type.
    #[must_use]
    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.registry
            .lock()
            .subscribers
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.registry.lock().pending.len()
    }

    /// Whether any pending request would accept a frame of this type.
    #[must_use]
    pub fn routes_response(&self, kind: &str) -> bool {
        self.registry
            .lock()
            .pending
            .values()
            .any(|p| response_type(&p.kind) == kind)
    }

    /// Register a pending request and build the message that carries it.
    ///
    /// The message has high priority and its id equals the correlation id.
    /// The entry is removed when the response arrives or when the returned
    /// [`PendingResponse`] is dropped.
    pub fn begin_request(&self, kind: &str, payload: Value) -> (Message, PendingResponse) {
        let id = generate_id();
        let payload = with_request_id(payload, &id);
        let (responder, rx) = oneshot::channel();

        self.registry.lock().pending.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                kind: kind.to_string(),
                payload: payload.clone(),
                timestamp: Utc::now(),
                responder,
            },
        );
        trace!(kind, request_id = %id, "request registered");

        let message = Message::new(kind, payload)
            .with_id(id.clone())
            .with_priority(Priority::High);
        let pending = PendingResponse {
            rx,
            kind: kind.to_string(),
            guard: PendingGuard {
                registry: Arc::downgrade(&self.registry),
                id,
            },
        };
        (message, pending)
    }

    /// Route one inbound frame.
    pub fn dispatch(&self, frame: Frame) {
        if is_response(&frame.kind) {
            self.resolve(frame);
            return;
        }
        if is_reserved(&frame.kind) {
            trace!(kind = %frame.kind, "reserved frame not dispatched");
            return;
        }

        let handlers: Vec<Handler> = self
            .registry
            .lock()
            .subscribers
            .get(&frame.kind)
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            trace!(kind = %frame.kind, "no subscribers");
            return;
        }

        let message = Message::from(frame);
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                error!(
                    kind = %message.kind,
                    id = %message.id,
                    panic = panic_message(panic.as_ref()),
                    "subscriber panicked"
                );
            }
        }
    }

    fn resolve(&self, frame: Frame) {
        let Some(request_id) = frame.payload_str(REQUEST_ID_FIELD).map(str::to_owned) else {
            debug!(kind = %frame.kind, "dropping response without requestId");
            return;
        };

        let pending = {
            let mut registry = self.registry.lock();
            match registry.pending.get(&request_id) {
                Some(p) if response_type(&p.kind) == frame.kind => {
                    registry.pending.remove(&request_id)
                }
                _ => None,
            }
        };

        match pending {
            Some(pending) => {
                trace!(kind = %pending.kind, request_id = %pending.id, "response matched");
                // The caller may have given up in the meantime.
                let _ = pending.responder.send(frame.payload);
            }
            None => debug!(kind = %frame.kind, request_id = %request_id, "dropping unmatched response"),
        }
    }
}

/// Handle to a registered subscriber.
#[must_use = "dropping a Subscription unsubscribes its handler"]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: String,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Subscribed message type.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Remove the handler.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the handler registered for the dispatcher's lifetime.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        if let Some(entries) = registry.subscribers.get_mut(&self.kind) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                registry.subscribers.remove(&self.kind);
            }
        }
        debug!(kind = %self.kind, subscriber = self.id, "unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

struct PendingGuard {
    registry: Weak<Mutex<Registry>>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().pending.remove(&self.id);
        }
    }
}

/// The caller's side of a pending request.
pub struct PendingResponse {
    rx: oneshot::Receiver<Value>,
    kind: String,
    guard: PendingGuard,
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("kind", &self.kind)
            .field("id", &self.guard.id)
            .finish()
    }
}

impl PendingResponse {
    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.guard.id
    }

    /// Wait for the response payload.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RequestTimeout`] if no response arrives in
    /// time, or [`ClientError::SessionClosed`] if the dispatcher went away.
    pub async fn wait(self, timeout: Duration) -> Result<Value> {
        let Self { rx, kind, guard } = self;
        let outcome = tokio::time::timeout(timeout, rx).await;
        drop(guard);
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ClientError::SessionClosed),
            Err(_) => {
                debug!(kind = %kind, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(ClientError::RequestTimeout { kind, timeout })
            }
        }
    }
}

/// Add the correlation id to a request payload.
///
/// Objects gain a `requestId` field; any other value is wrapped as
/// `{"value": .., "requestId": ..}`, and `null` becomes `{"requestId": ..}`.
fn with_request_id(payload: Value, id: &str) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert(REQUEST_ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
