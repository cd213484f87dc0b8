//! Socket transport.
//!
//! Owns the WebSocket connection, the auth handshake, the heartbeat and the
//! reconnection/backoff state machine.

mod backoff;
pub(crate) mod driver;
mod heartbeat;
mod machine;

pub use backoff::{calculate_backoff, ReconnectConfig};
pub use driver::{connection_url, CLOSE_GRACE};
pub use heartbeat::{Heartbeat, HeartbeatConfig, Tick};
pub use machine::{Effect, HaltReason, Input, Link, LinkState};
