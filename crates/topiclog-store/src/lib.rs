//! Durable, topic-indexed event log.
//!
//! [`EventStore`] owns an SQLite file with two tables: `events`, an
//! append-only log of every payload ever written, and `topics`, the set of
//! distinct topic names. Payloads are stored through the
//! [`topiclog_codec`] tag scheme so they decode back to typed values.
//!
//! # Write modes
//!
//! | Mode | `write` behaviour |
//! |------|-------------------|
//! | [`WriteMode::Async`] | encodes, enqueues, returns; a dedicated writer thread commits in FIFO order |
//! | [`WriteMode::Sync`] | commits inline on the caller's thread under the writer mutex |
//!
//! Either way every mutating statement goes through exactly one connection,
//! so commits land in submission order. Reads use a separate pool of WAL
//! reader connections and never wait on the writer.
//!
//! # Lifecycle
//!
//! `Idle -> Starting -> Running -> ShuttingDown -> Stopped`. [`EventStore::open`]
//! returns once the writer is `Running` (or fails with
//! [`StoreError::Open`]); [`EventStore::close`] moves through `ShuttingDown`
//! to `Stopped`, either draining the queue or discarding it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use topiclog_store::{EventStore, StoreConfig};
//!
//! let store = EventStore::open("telemetry.db", StoreConfig::default())?;
//! store.write("sensor0/temperature_C", 21.5f32)?;
//! store.close(true)?;
//!
//! for sample in store.get_events("sensor0/temperature_C", None, None)? {
//!     println!("{} {:?}", sample.timestamp, sample.value);
//! }
//! ```

mod error;
mod event;
mod store;
mod writer;

pub use error::StoreError;
pub use event::{format_timestamp, parse_timestamp, Lifecycle, Sample, StoreStats, WriteMode};
pub use store::{EventStore, StoreConfig};

#[cfg(test)]
mod tests;
