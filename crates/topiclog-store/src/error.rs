//! Error types for the event store.

use topiclog_codec::CodecError;

use crate::event::Lifecycle;

/// Errors that can occur during event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be opened: the path is unwritable, the file is
    /// not a usable database, or the writer failed to start in time.
    #[error("failed to open event store at {path}: {reason}")]
    Open {
        /// The database path that was being opened.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// The operation is not valid in the store's current lifecycle state.
    #[error("event store is {actual}, expected {expected}")]
    InvalidState {
        /// The state the operation requires.
        expected: Lifecycle,
        /// The state the store was actually in.
        actual: Lifecycle,
    },

    /// A payload could not be encoded or decoded.
    #[error("event store codec error: {0}")]
    Codec(#[from] CodecError),

    /// A database read failed.
    #[error("event store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No reader connection could be checked out.
    #[error("event store pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored timestamp could not be parsed.
    #[error("event store timestamp error: {0:?}")]
    Timestamp(String),
}
