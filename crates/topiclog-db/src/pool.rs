//! Connection setup and reader pool creation.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled reader connections.
    pub pool_max_size: u32,

    /// How long to wait for a pooled connection before giving up, in
    /// milliseconds.
    pub connection_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 4,
            connection_timeout_ms: 5_000,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX
}

/// Applies WAL journaling and the busy timeout to a fresh connection.
///
/// This is also the first statement run against a newly opened file, so a
/// file that is not an SQLite database fails here.
///
/// # Errors
///
/// Returns the underlying `rusqlite::Error` if a pragma fails or WAL mode is
/// refused.
pub fn configure_connection(
    conn: &Connection,
    settings: DbRuntimeSettings,
) -> rusqlite::Result<()> {
    // Set first so switching the journal mode waits out a competing lock.
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;

    // In-memory databases report "memory", which is expected and acceptable.
    let journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("failed to set WAL journal mode, got: {}", journal_mode)),
        ));
    }
    Ok(())
}

/// Opens and configures a single connection, creating the file if needed.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the path cannot be opened or the file is not
/// a usable SQLite database.
pub fn open_connection(
    db_path: impl AsRef<Path>,
    settings: DbRuntimeSettings,
) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(db_path, open_flags())?;
    configure_connection(&conn, settings)?;
    Ok(conn)
}

/// Creates a pool of configured SQLite connections.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. `:memory:` gives every
///   pooled connection its own private database, so it is only useful for
///   tests that exercise a single connection.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(
    db_path: impl AsRef<Path>,
    settings: DbRuntimeSettings,
) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path.as_ref())
        .with_flags(open_flags())
        .with_init(move |conn| configure_connection(conn, settings));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.connection_timeout_ms))
        .build(manager)?;

    Ok(pool)
}
