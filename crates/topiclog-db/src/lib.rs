//! Database layer for topiclog.
//!
//! Provides SQLite connection setup, a pooled set of reader connections
//! (via `r2d2`), and the embedded schema migrations for the event log.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: one writer and any number of concurrent
//!   readers, which is exactly the event store's access pattern.
//! - **Schema compatibility**: the `events` and `topics` tables are created
//!   with the same column layout existing log files already use, so a
//!   database written by an earlier deployment opens unchanged.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{
    configure_connection, create_pool, open_connection, DbPool, DbRuntimeSettings, PoolError,
};
