//! The single writer: lifecycle control and the background commit loop.
//!
//! All mutating SQL runs through [`commit`], either on the dedicated writer
//! thread (async mode) or under the store's writer mutex (sync mode).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection};
use topiclog_codec::Encoded;
use topiclog_db::DbRuntimeSettings;

use crate::event::{Lifecycle, StoreStats};

/// A single event waiting to be committed.
#[derive(Debug)]
pub(crate) struct PendingEvent {
    pub topic: String,
    pub encoded: Encoded,
    /// Pre-formatted timestamp; `None` lets the column default apply.
    pub timestamp: Option<String>,
}

/// Messages on the writer queue.
#[derive(Debug)]
pub(crate) enum WriteRequest {
    Event(PendingEvent),
    /// Sentinel: stop after everything queued ahead of it.
    Shutdown,
}

pub(crate) struct Control {
    pub state: Lifecycle,
    pub startup_error: Option<String>,
}

/// State shared between the store handle and its writer.
pub(crate) struct Shared {
    control: Mutex<Control>,
    changed: Condvar,
    abort: AtomicBool,
    committed: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            control: Mutex::new(Control {
                state: Lifecycle::Idle,
                startup_error: None,
            }),
            changed: Condvar::new(),
            abort: AtomicBool::new(false),
            committed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> Lifecycle {
        self.lock().state
    }

    /// Moves to `to` and wakes anyone waiting on a state change.
    pub fn set_state(&self, control: &mut Control, to: Lifecycle) {
        tracing::debug!(from = %control.state, to = %to, "event store state change");
        control.state = to;
        self.changed.notify_all();
    }

    /// Blocks while the writer is `Starting`, for at most `timeout`.
    ///
    /// A guard still showing `Starting` means the wait timed out.
    pub fn wait_started(&self, timeout: Duration) -> MutexGuard<'_, Control> {
        let guard = self.lock();
        match self
            .changed
            .wait_timeout_while(guard, timeout, |c| c.state == Lifecycle::Starting)
        {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    fn aborting(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Commits one event: the event row first, then the topic row.
///
/// A failed event insert is logged and dropped. The topic insert ignores
/// existing names, and any other failure there is logged without touching
/// the already-committed event row.
pub(crate) fn commit(conn: &Connection, event: &PendingEvent, shared: &Shared) {
    let data = &event.encoded.data;
    let format = event.encoded.format.as_str();

    let inserted = match &event.timestamp {
        Some(ts) => conn.execute(
            "INSERT INTO events (topic, timestamp, data, format_string) VALUES (?1, ?2, ?3, ?4)",
            params![event.topic, ts, data, format],
        ),
        None => conn.execute(
            "INSERT INTO events (topic, data, format_string) VALUES (?1, ?2, ?3)",
            params![event.topic, data, format],
        ),
    };

    if let Err(e) = inserted {
        shared.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            topic = %event.topic,
            error = %e,
            "failed to insert event row, dropping write"
        );
        return;
    }
    shared.committed.fetch_add(1, Ordering::Relaxed);

    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO topics (name) VALUES (?1)",
        params![event.topic],
    ) {
        tracing::warn!(topic = %event.topic, error = %e, "failed to record topic name");
    }
}

/// Opens the database and applies the schema.
pub(crate) fn open_writer_connection(
    path: &std::path::Path,
    settings: DbRuntimeSettings,
) -> Result<Connection, String> {
    let conn = topiclog_db::open_connection(path, settings).map_err(|e| e.to_string())?;
    let applied = topiclog_db::run_migrations(&conn).map_err(|e| e.to_string())?;
    if applied > 0 {
        tracing::info!(count = applied, "applied event store migrations");
    }
    Ok(conn)
}

/// Body of the writer thread.
///
/// Reports start-up success or failure through `shared`, then commits
/// queued events in FIFO order until the shutdown sentinel arrives or an
/// abort is requested.
pub(crate) fn run(
    path: PathBuf,
    settings: DbRuntimeSettings,
    rx: Receiver<WriteRequest>,
    shared: Arc<Shared>,
) {
    let conn = match open_writer_connection(&path, settings) {
        Ok(conn) => conn,
        Err(reason) => {
            let mut control = shared.lock();
            control.startup_error = Some(reason);
            shared.set_state(&mut control, Lifecycle::Stopped);
            return;
        }
    };

    {
        let mut control = shared.lock();
        if control.state != Lifecycle::Starting {
            // `open` gave up waiting; nobody will ever send to us.
            tracing::warn!(path = %path.display(), "writer started after open timed out, exiting");
            return;
        }
        shared.set_state(&mut control, Lifecycle::Running);
    }

    tracing::debug!(path = %path.display(), "event store writer running");

    while let Ok(request) = rx.recv() {
        match request {
            WriteRequest::Shutdown => break,
            WriteRequest::Event(event) => {
                if shared.aborting() {
                    let remaining = rx
                        .try_iter()
                        .filter(|r| matches!(r, WriteRequest::Event(_)))
                        .count() as u64;
                    shared.discarded.fetch_add(remaining + 1, Ordering::Relaxed);
                    break;
                }
                commit(&conn, &event, &shared);
            }
        }
    }

    drop(conn);
    tracing::debug!(path = %path.display(), "event store writer exited");
}
