//! # switchboard-proto
//!
//! Wire protocol for Switchboard real-time sessions: the JSON frame that
//! travels over the socket, the outbound [`Message`] the client queues, and
//! the reserved control types the transport handles internally.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod messages;
pub mod types;

pub use control::{ControlFrame, CLOSE_AUTH_FAILED, CLOSE_NORMAL};
pub use error::ProtoError;
pub use messages::{Frame, Message};
pub use types::{generate_id, now_millis, Priority};
