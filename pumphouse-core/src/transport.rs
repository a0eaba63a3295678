//! Transport boundary
//!
//! The scheduler hands serialized payloads to a [`Transport`] and later
//! learns their fate through [`Event::Published`](crate::events::Event) or
//! [`Event::Disconnected`](crate::events::Event) posted by the transport's
//! own I/O task. Publish is an enqueue: a returned [`MessageId`] means the
//! message was accepted for sending, not that it arrived.

use core::fmt;

pub use crate::errors::TransportError;

/// Identifier correlating a publish with its acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(
    /// Transport-assigned, strictly increasing per connection
    pub u32,
);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message transport as seen by the delivery scheduler
///
/// `publish` must not block except when the transport's own outgoing queue
/// is full. A `NotConnected` error is the normal offline case and is
/// handled by stash-and-retry, not surfaced further.
pub trait Transport: Send {
    /// Enqueue `payload` for delivery on `topic`
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<MessageId, TransportError>;
}
