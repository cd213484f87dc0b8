//! # switchboard-client
//!
//! Reconnecting real-time session client.
//!
//! A [`Session`] keeps one WebSocket connection to the server alive across
//! flaky networks. It provides:
//! - Exponential backoff with jitter between reconnection attempts
//! - A bounded priority queue for messages sent while offline
//! - Heartbeat latency tracking and dead-connection detection
//! - Mid-session token refresh through a [`TokenSource`]
//! - Per-type subscriptions and correlated request/response
//!
//! ```rust,no_run
//! use serde_json::json;
//! use switchboard_client::{Message, SessionBuilder, SessionConfig};
//!
//! # async fn demo() -> switchboard_client::Result<()> {
//! let session = SessionBuilder::new(SessionConfig::new("wss://crm.example.com/ws"))
//!     .token_source(|| async { Some("token".to_string()) })
//!     .build()?;
//!
//! let _presence = session.subscribe("presence", |m| println!("{}", m.payload));
//! session.connect().await?;
//! session.send(Message::new("typing", json!({"thread": 7}))).await?;
//! let contact = session.request("get_contact", json!({"id": 42}), None).await?;
//! # let _ = contact;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod session;
pub mod transport;

pub use auth::{SharedTokenSource, TokenSource};
pub use config::{ReconnectSettings, SessionConfig};
pub use dispatch::{Dispatcher, Handler, PendingResponse, Subscription};
pub use error::{ClientError, Result};
pub use events::SessionEvent;
pub use metrics::{ConnectionMetrics, ConnectionState, ConnectionStatus};
pub use queue::PriorityQueue;
pub use session::{Session, SessionBuilder};
pub use switchboard_proto::{Message, Priority, CLOSE_AUTH_FAILED, CLOSE_NORMAL};
pub use transport::ReconnectConfig;
