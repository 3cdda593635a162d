//! The [`EventStore`] handle: open, write, query, close.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use topiclog_codec::{decode, encode, Encoded, FormatTag, Value};
use topiclog_db::{create_pool, DbPool, DbRuntimeSettings};

use crate::error::StoreError;
use crate::event::{format_timestamp, parse_timestamp, Lifecycle, Sample, StoreStats, WriteMode};
use crate::writer::{self, PendingEvent, Shared, WriteRequest};

/// Configuration for [`EventStore::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Whether writes are committed inline or by the background writer.
    pub write_mode: WriteMode,
    /// How long `open` waits for the writer to become ready.
    pub startup_timeout: Duration,
    /// Connection settings for the writer and the reader pool.
    pub db: DbRuntimeSettings,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::Async,
            startup_timeout: Duration::from_secs(5),
            db: DbRuntimeSettings::default(),
        }
    }
}

enum Writer {
    Sync(Mutex<Option<Connection>>),
    Async {
        tx: Sender<WriteRequest>,
        handle: Mutex<Option<JoinHandle<()>>>,
    },
}

/// A durable, topic-indexed event log.
///
/// `EventStore` is `Send + Sync`; share it behind an `Arc` between the
/// producers that write and the collaborators that query.
pub struct EventStore {
    path: PathBuf,
    shared: Arc<Shared>,
    writer: Writer,
    readers: DbPool,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("path", &self.path)
            .field("mode", &self.write_mode())
            .field("state", &self.state())
            .finish()
    }
}

impl EventStore {
    /// Opens (creating if absent) the event log at `path`.
    ///
    /// Idempotent: opening an existing log adopts its tables and rows. In
    /// async mode this does not return until the writer thread is running
    /// or has failed, waiting at most `config.startup_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if the path is unwritable, the file is not
    /// an SQLite database, or the writer does not start in time.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |reason: String| StoreError::Open {
            path: path.display().to_string(),
            reason,
        };

        let shared = Arc::new(Shared::new());
        {
            let mut control = shared.lock();
            shared.set_state(&mut control, Lifecycle::Starting);
        }

        let writer = match config.write_mode {
            WriteMode::Sync => match writer::open_writer_connection(&path, config.db) {
                Ok(conn) => {
                    let mut control = shared.lock();
                    shared.set_state(&mut control, Lifecycle::Running);
                    Writer::Sync(Mutex::new(Some(conn)))
                }
                Err(reason) => {
                    let mut control = shared.lock();
                    shared.set_state(&mut control, Lifecycle::Stopped);
                    return Err(open_error(reason));
                }
            },
            WriteMode::Async => Self::start_writer(&path, &config, &shared).map_err(open_error)?,
        };

        let readers = match create_pool(&path, config.db) {
            Ok(pool) => pool,
            Err(e) => {
                writer.stop(&shared, true);
                let mut control = shared.lock();
                shared.set_state(&mut control, Lifecycle::Stopped);
                return Err(open_error(e.to_string()));
            }
        };

        tracing::info!(path = %path.display(), mode = ?config.write_mode, "event store opened");

        Ok(Self {
            path,
            shared,
            writer,
            readers,
        })
    }

    fn start_writer(
        path: &Path,
        config: &StoreConfig,
        shared: &Arc<Shared>,
    ) -> Result<Writer, String> {
        let (tx, rx) = mpsc::channel();
        let thread_path = path.to_path_buf();
        let thread_shared = Arc::clone(shared);
        let settings = config.db;

        let handle = std::thread::Builder::new()
            .name("topiclog-writer".to_string())
            .spawn(move || writer::run(thread_path, settings, rx, thread_shared))
            .map_err(|e| {
                let mut control = shared.lock();
                shared.set_state(&mut control, Lifecycle::Stopped);
                format!("failed to spawn writer thread: {e}")
            })?;

        let mut control = shared.wait_started(config.startup_timeout);
        match control.state {
            Lifecycle::Running => Ok(Writer::Async {
                tx,
                handle: Mutex::new(Some(handle)),
            }),
            Lifecycle::Starting => {
                shared.set_state(&mut control, Lifecycle::Stopped);
                Err(format!("writer did not start within {:?}", config.startup_timeout))
            }
            _ => {
                let reason = control
                    .startup_error
                    .take()
                    .unwrap_or_else(|| "writer stopped during start-up".to_string());
                drop(control);
                let _ = handle.join();
                Err(reason)
            }
        }
    }

    /// Enqueues `value` for `topic`, stamped with the insertion time.
    ///
    /// In async mode this never blocks on storage I/O and the row may not
    /// be visible to readers yet when it returns. A write that later fails
    /// to commit is logged and counted in [`StoreStats::dropped`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidState` if the store is not running.
    pub fn write(&self, topic: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        self.submit(topic, encode(&value.into()), None)
    }

    /// Like [`write`](Self::write), with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidState` if the store is not running.
    pub fn write_at(
        &self,
        topic: &str,
        value: impl Into<Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.submit(topic, encode(&value.into()), Some(format_timestamp(&timestamp)))
    }

    /// Writes an already-encoded payload.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidState` if the store is not running.
    pub fn write_encoded(&self, topic: &str, encoded: Encoded) -> Result<(), StoreError> {
        self.submit(topic, encoded, None)
    }

    fn submit(
        &self,
        topic: &str,
        encoded: Encoded,
        timestamp: Option<String>,
    ) -> Result<(), StoreError> {
        let event = PendingEvent {
            topic: topic.to_string(),
            encoded,
            timestamp,
        };

        match &self.writer {
            Writer::Async { tx, .. } => {
                // Held across the send so no request can slip in behind
                // the shutdown sentinel.
                let control = self.shared.lock();
                expect_running(control.state)?;
                tx.send(WriteRequest::Event(event)).map_err(|_| {
                    tracing::error!(%topic, "writer queue closed unexpectedly");
                    StoreError::InvalidState {
                        expected: Lifecycle::Running,
                        actual: Lifecycle::Stopped,
                    }
                })
            }
            Writer::Sync(conn) => {
                expect_running(self.shared.state())?;
                let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
                match guard.as_ref() {
                    Some(conn) => {
                        writer::commit(conn, &event, &self.shared);
                        Ok(())
                    }
                    None => Err(StoreError::InvalidState {
                        expected: Lifecycle::Running,
                        actual: self.shared.state(),
                    }),
                }
            }
        }
    }

    /// Returns every distinct topic name in ascending order.
    ///
    /// A storage failure is logged and yields an empty list: the store is
    /// degraded, not crashed.
    pub fn get_topics(&self) -> Vec<String> {
        match self.query_topics() {
            Ok(topics) => topics,
            Err(e) => {
                tracing::error!(error = %e, "failed to list topics");
                Vec::new()
            }
        }
    }

    fn query_topics(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.readers.get()?;
        let mut stmt = conn.prepare("SELECT name FROM topics ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut topics = Vec::new();
        for row in rows {
            topics.push(row?);
        }
        Ok(topics)
    }

    /// Returns the events for `topic` in timestamp order.
    ///
    /// `from` and `to` are inclusive bounds; `None` leaves that side open.
    /// Events sharing a timestamp come back in commit order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` or `StoreError::Pool` on storage
    /// failure, and `StoreError::Codec` if a stored payload does not decode.
    pub fn get_events(
        &self,
        topic: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, StoreError> {
        let mut clauses = vec!["topic = ?1".to_string()];
        let mut param_values: Vec<String> = vec![topic.to_string()];

        if let Some(from) = from {
            param_values.push(format_timestamp(&from));
            clauses.push(format!("timestamp >= ?{}", param_values.len()));
        }
        if let Some(to) = to {
            param_values.push(format_timestamp(&to));
            clauses.push(format!("timestamp <= ?{}", param_values.len()));
        }

        let sql = format!(
            "SELECT timestamp, data, format_string FROM events
             WHERE {}
             ORDER BY timestamp ASC, id ASC",
            clauses.join(" AND ")
        );

        let conn = self.readers.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(param_values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<Vec<u8>>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (timestamp, data, format) = row?;
            // Rows written before payloads were tagged hold raw bytes.
            let tag = format.as_deref().unwrap_or(FormatTag::Raw.as_str());
            samples.push(Sample {
                timestamp: parse_timestamp(&timestamp)?,
                value: decode(data.as_deref().unwrap_or_default(), tag)?,
            });
        }

        Ok(samples)
    }

    /// Stops accepting writes and shuts the writer down.
    ///
    /// With `drain` set, blocks until every previously submitted write is
    /// committed. Without it, the write in flight finishes and everything
    /// still queued is discarded (counted in [`StoreStats::discarded`]).
    /// Reads keep working afterwards.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidState` unless the store is running.
    pub fn close(&self, drain: bool) -> Result<(), StoreError> {
        {
            let mut control = self.shared.lock();
            expect_running(control.state)?;
            self.shared.set_state(&mut control, Lifecycle::ShuttingDown);
        }

        self.writer.stop(&self.shared, drain);

        {
            let mut control = self.shared.lock();
            self.shared.set_state(&mut control, Lifecycle::Stopped);
        }

        let stats = self.stats();
        tracing::info!(
            path = %self.path.display(),
            drain,
            committed = stats.committed,
            dropped = stats.dropped,
            discarded = stats.discarded,
            "event store closed"
        );
        Ok(())
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        self.shared.state()
    }

    /// Returns the write counters accumulated since `open`.
    pub fn stats(&self) -> StoreStats {
        self.shared.stats()
    }

    /// Returns the configured write mode.
    pub fn write_mode(&self) -> WriteMode {
        match self.writer {
            Writer::Sync(_) => WriteMode::Sync,
            Writer::Async { .. } => WriteMode::Async,
        }
    }

    /// Returns the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Writer {
    fn stop(&self, shared: &Shared, drain: bool) {
        match self {
            Writer::Async { tx, handle } => {
                if !drain {
                    shared.request_abort();
                }
                // Fails only if the writer already exited.
                let _ = tx.send(WriteRequest::Shutdown);
                let handle = handle.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        tracing::error!("event store writer thread panicked");
                    }
                }
            }
            Writer::Sync(conn) => {
                conn.lock().unwrap_or_else(|e| e.into_inner()).take();
            }
        }
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        if self.state() == Lifecycle::Running {
            tracing::debug!(
                path = %self.path.display(),
                "event store dropped while running, draining"
            );
            let _ = self.close(true);
        }
    }
}

fn expect_running(actual: Lifecycle) -> Result<(), StoreError> {
    if actual == Lifecycle::Running {
        Ok(())
    } else {
        Err(StoreError::InvalidState {
            expected: Lifecycle::Running,
            actual,
        })
    }
}
