//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time. They run sequentially
//! when a store opens, tracked by the `_topiclog_migrations` table. Each
//! migration runs exactly once; if it has already been applied, it is
//! skipped. The schema statements themselves use `IF NOT EXISTS`, so a log
//! file created before migration tracking existed is adopted as-is.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_events",
        sql: include_str!("migrations/000_events.sql"),
    },
    Migration {
        name: "001_events_topic_index",
        sql: include_str!("migrations/001_events_topic_index.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations against the given connection.
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

/// Names recorded in the tracking table.
fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM _topiclog_migrations")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _topiclog_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| MigrationError::ExecutionFailed {
        name: "_topiclog_migrations_bootstrap".to_string(),
        source: e,
    })?;

    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;
    let mut applied = 0;

    for migration in migrations.iter().filter(|m| !done.contains(m.name)) {
        tracing::info!(migration = migration.name, "applying migration");

        let exec_failed = |e: rusqlite::Error| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source: e,
        };

        let tx = conn.unchecked_transaction().map_err(exec_failed)?;
        tx.execute_batch(migration.sql).map_err(exec_failed)?;
        tx.execute(
            "INSERT INTO _topiclog_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(exec_failed)?;
        tx.commit().map_err(exec_failed)?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_sql(conn: &Connection, table: &str) -> String {
        conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .expect("table should exist")
    }

    #[test]
    fn run_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _topiclog_migrations", [], |row| {
                row.get(0)
            })
            .expect("should query migration count");
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn run_migrations_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&conn).expect("first run should succeed");
        assert_eq!(first, MIGRATIONS.len());

        let second = run_migrations(&conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");
    }

    #[test]
    fn schema_matches_log_file_layout() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");

        let events = table_sql(&conn, "events");
        for column in [
            "id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
            "topic TEXT NOT NULL",
            "timestamp DATETIME DEFAULT CURRENT_TIMESTAMP NOT NULL",
            "data BLOB",
            "format_string TEXT",
        ] {
            assert!(events.contains(column), "events missing `{column}`: {events}");
        }

        let topics = table_sql(&conn, "topics");
        assert!(topics.contains("name TEXT UNIQUE NOT NULL"), "{topics}");
    }

    #[test]
    fn adopts_existing_untracked_log() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch(
            "CREATE TABLE events(
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                topic TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP NOT NULL,
                data BLOB,
                format_string TEXT
            );
            CREATE TABLE topics(
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT UNIQUE NOT NULL
            );
            INSERT INTO events (topic, data, format_string) VALUES ('old', x'01', '-');",
        )
        .expect("should create legacy tables");

        run_migrations(&conn).expect("migrations should adopt legacy tables");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("should count events");
        assert_eq!(count, 1, "existing rows must survive");
    }

    #[test]
    fn failed_events_migration_leaves_schema_and_rows_untouched() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("base migrations should succeed");
        conn.execute(
            "INSERT INTO events (topic, data, format_string) VALUES ('sensor0/lux', x'01', '-')",
            [],
        )
        .expect("should insert event");

        let migrations = [
            Migration {
                name: "002_events_by_time",
                sql: "
                    CREATE INDEX idx_events_timestamp ON events(timestamp);
                    DELETE FROM events;
                    UPDATE events SET payload = data;
                ",
            },
            Migration {
                name: "003_after_failure",
                sql: "CREATE TABLE never_created (id INTEGER);",
            },
        ];

        let err = run_migrations_from_list(&conn, &migrations)
            .expect_err("missing column should fail the migration");
        let MigrationError::ExecutionFailed { name, .. } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(name, "002_events_by_time");

        let objects: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE name IN ('idx_events_timestamp', 'never_created')",
                [],
                |row| row.get(0),
            )
            .expect("should query sqlite_master");
        assert_eq!(objects, 0, "index and later migration must not exist");

        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("should count events");
        assert_eq!(events, 1, "deleted rows must be restored");

        let done = applied_names(&conn).expect("should read tracking table");
        assert_eq!(done.len(), MIGRATIONS.len());
        assert!(!done.contains("002_events_by_time"));
    }
}
