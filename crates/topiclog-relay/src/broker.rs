//! The publish/subscribe client the relay drives.

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::filter::TopicFilter;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The concrete topic the message was published on.
    pub topic: String,
    /// The raw payload.
    pub payload: Vec<u8>,
    /// Delivery quality of service (0, 1 or 2).
    pub qos: u8,
    /// Whether the broker replayed this as a retained message.
    pub retain: bool,
}

/// Something the broker reports to the receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A published message.
    Message(InboundMessage),
    /// The client re-established its connection on its own.
    Reconnected {
        /// Whether the broker kept the previous session's subscriptions.
        session_present: bool,
    },
    /// The connection dropped; the client will try again on the next poll.
    ConnectionLost(String),
}

/// A publish/subscribe client.
///
/// Implementations own their connection parameters (host, port, client id)
/// and their reconnect policy. The relay calls `connect` and `subscribe`
/// once per [`initialise`](crate::Relay::initialise), then polls
/// `next_event` from its receive loop until it is told to stop.
///
/// `next_event` must be cancel-safe: the receive loop races it against the
/// shutdown signal and may drop the future before it completes.
#[async_trait]
pub trait Broker: Send + 'static {
    /// Opens the connection.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Subscribes to every topic selected by `filter`.
    async fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), BrokerError>;

    /// Waits for the next message or connection event.
    async fn next_event(&mut self) -> Result<BrokerEvent, BrokerError>;

    /// Closes the connection.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
