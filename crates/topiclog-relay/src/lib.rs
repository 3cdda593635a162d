//! Topic relay for topiclog.
//!
//! A [`Relay`] drives a [`Broker`] (any publish/subscribe client), keeps the
//! set of topics it has seen, and hands every message to the registered
//! observers:
//!
//! - new-topic observers run once per topic, on its first message;
//! - new-data observers run for every message.
//!
//! Each observer is fed through its own queue and worker, so a slow,
//! blocked or panicking observer never stalls the receive loop or its
//! siblings.

pub mod broker;
mod dispatch;
pub mod error;
pub mod filter;
pub mod relay;

pub use broker::{Broker, BrokerEvent, InboundMessage};
pub use dispatch::{DataObserver, TopicObserver};
pub use error::{BrokerError, RelayError};
pub use filter::TopicFilter;
pub use relay::{Relay, RelayConfig, RelayState};
