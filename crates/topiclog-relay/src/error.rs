//! Error types for the topic relay.

use crate::relay::RelayState;

/// Errors reported by a [`Broker`](crate::Broker) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The connection could not be established.
    #[error("broker connect failed: {0}")]
    Connect(String),

    /// The subscription request was rejected or could not be sent.
    #[error("broker subscribe failed: {0}")]
    Subscribe(String),

    /// A transient transport failure while receiving.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The broker will never produce another event.
    #[error("broker event stream closed")]
    Closed,
}

/// Errors that can occur while driving the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The operation is not valid in the relay's current state.
    #[error("relay is {actual}, expected {expected}")]
    InvalidState {
        /// The state the operation requires.
        expected: RelayState,
        /// The state the relay was actually in.
        actual: RelayState,
    },

    /// A topic filter does not follow the wildcard syntax.
    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidFilter {
        /// The rejected filter.
        filter: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The initial broker connection failed.
    #[error("relay could not connect: {0}")]
    Connect(BrokerError),

    /// The initial subscription failed.
    #[error("relay could not subscribe: {0}")]
    Subscribe(BrokerError),

    /// The broker was lost when a previous receive loop failed.
    #[error("relay broker is unavailable")]
    BrokerUnavailable,

    /// The receive loop task panicked or was cancelled.
    #[error("relay receive loop failed: {0}")]
    Join(String),
}
