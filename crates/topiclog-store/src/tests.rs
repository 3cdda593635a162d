//! Unit tests for the event store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use tempfile::TempDir;
use topiclog_codec::Value;
use topiclog_db::DbRuntimeSettings;

use crate::error::StoreError;
use crate::event::{format_timestamp, parse_timestamp, Lifecycle, WriteMode};
use crate::store::{EventStore, StoreConfig};

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("events.db");
    (dir, path)
}

fn config(write_mode: WriteMode) -> StoreConfig {
    StoreConfig {
        write_mode,
        ..StoreConfig::default()
    }
}

fn values(store: &EventStore, topic: &str) -> Vec<Value> {
    store
        .get_events(topic, None, None)
        .expect("get_events should succeed")
        .into_iter()
        .map(|s| s.value)
        .collect()
}

fn count(path: &Path, sql: &str) -> i64 {
    let conn = Connection::open(path).expect("should open raw connection");
    conn.query_row(sql, [], |row| row.get(0))
        .expect("should run count query")
}

// ── open ─────────────────────────────────────────────────────────────

#[test]
fn open_creates_file_and_runs() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open should succeed");

    assert!(path.exists());
    assert_eq!(store.state(), Lifecycle::Running);
    assert_eq!(store.write_mode(), WriteMode::Async);
    assert!(store.get_topics().is_empty());
}

#[test]
fn open_is_idempotent() {
    let (_dir, path) = temp_db();

    let store = EventStore::open(&path, StoreConfig::default()).expect("first open");
    store.write("sensor0/lux", 120.0f32).expect("write");
    store.close(true).expect("close");
    drop(store);

    let reopened = EventStore::open(&path, StoreConfig::default()).expect("second open");
    assert_eq!(reopened.get_topics(), vec!["sensor0/lux"]);
    assert_eq!(values(&reopened, "sensor0/lux"), vec![Value::Float(120.0)]);
}

#[test]
fn open_fails_on_unwritable_path() {
    let (dir, _) = temp_db();
    let path = dir.path().join("missing").join("events.db");

    for mode in [WriteMode::Async, WriteMode::Sync] {
        let err = EventStore::open(&path, config(mode)).expect_err("open should fail");
        assert!(matches!(err, StoreError::Open { .. }), "unexpected error: {err:?}");
    }
}

#[test]
fn open_fails_on_corrupt_file() {
    let (_dir, path) = temp_db();
    std::fs::write(&path, b"this is not an sqlite database, just some text".repeat(100))
        .expect("should write garbage");

    for mode in [WriteMode::Async, WriteMode::Sync] {
        let err = EventStore::open(&path, config(mode)).expect_err("open should fail");
        assert!(matches!(err, StoreError::Open { .. }), "unexpected error: {err:?}");
    }
}

#[test]
fn open_gives_up_when_the_file_stays_locked() {
    let (_dir, path) = temp_db();
    let holder = Connection::open(&path).expect("should open lock holder");
    holder
        .execute_batch("CREATE TABLE lock_holder (x INTEGER); BEGIN EXCLUSIVE;")
        .expect("should take exclusive lock");

    let locked = StoreConfig {
        startup_timeout: Duration::from_millis(200),
        db: DbRuntimeSettings {
            busy_timeout_ms: 3_000,
            ..DbRuntimeSettings::default()
        },
        ..config(WriteMode::Async)
    };
    let started = Instant::now();
    let err = EventStore::open(&path, locked).expect_err("open should time out");
    let elapsed = started.elapsed();

    assert!(matches!(err, StoreError::Open { .. }), "unexpected error: {err:?}");
    assert!(
        elapsed < Duration::from_secs(2),
        "open should give up at the startup timeout, took {elapsed:?}"
    );

    holder.execute_batch("COMMIT;").expect("should release lock");
    drop(holder);

    let store = EventStore::open(&path, StoreConfig::default()).expect("open after release");
    assert_eq!(store.state(), Lifecycle::Running);
    store.write("sensor0/lux", 42.0f32).expect("write");
    store.close(true).expect("close");
    assert_eq!(values(&store, "sensor0/lux"), vec![Value::Float(42.0)]);
}

// ── write + read ─────────────────────────────────────────────────────

#[test]
fn drained_writes_are_all_readable() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    store.write("f_topic", 1.0f32).expect("write");
    store.write("f_topic", 2.0f32).expect("write");
    store.write("f_topic", 3.0f32).expect("write");
    store.close(true).expect("close");

    assert_eq!(store.state(), Lifecycle::Stopped);
    assert_eq!(
        values(&store, "f_topic"),
        vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]
    );
    assert_eq!(store.stats().committed, 3);
}

#[test]
fn every_kind_survives_storage() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let written = vec![
        Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
        Value::Text("door open".to_string()),
        Value::Float(-0.25),
        Value::Int(-17),
    ];
    for v in &written {
        store.write("mixed", v.clone()).expect("write");
    }
    store.close(true).expect("close");

    assert_eq!(values(&store, "mixed"), written);
}

#[test]
fn topics_are_sorted_regardless_of_write_order() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    store.write("b_topic", 1).expect("write");
    store.write("a_topic", 2).expect("write");
    store.close(true).expect("close");

    assert_eq!(store.get_topics(), vec!["a_topic", "b_topic"]);
}

#[test]
fn repeated_topic_adds_one_topic_row() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    store.write("humidity", 40.5f32).expect("first write");
    store.write("humidity", 41.0f32).expect("second write");
    store.close(true).expect("close");

    assert_eq!(count(&path, "SELECT COUNT(*) FROM topics WHERE name = 'humidity'"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM events WHERE topic = 'humidity'"), 2);
    assert_eq!(store.stats().dropped, 0);
}

#[test]
fn stored_columns_use_wire_format() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");
    store.write("battery_mV", 1.0f32).expect("write");
    store.close(true).expect("close");

    let conn = Connection::open(&path).expect("raw open");
    let (data, format): (Vec<u8>, String) = conn
        .query_row(
            "SELECT data, format_string FROM events WHERE topic = 'battery_mV'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("should read row");
    assert_eq!(data, vec![0x00, 0x00, 0x80, 0x3f]);
    assert_eq!(format, "f");
}

#[test]
fn explicit_timestamps_bound_inclusively() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let t = |s: u32| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, s).unwrap();
    // Written out of order on purpose; reads come back by timestamp.
    store.write_at("soil", 3, t(30)).expect("write");
    store.write_at("soil", 1, t(10)).expect("write");
    store.write_at("soil", 2, t(20)).expect("write");
    store.write_at("soil", 4, t(40)).expect("write");
    store.close(true).expect("close");

    let all = store.get_events("soil", None, None).expect("read");
    assert_eq!(
        all.iter().map(|s| s.value.clone()).collect::<Vec<_>>(),
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
    );
    assert_eq!(all[0].timestamp, t(10));

    let bounded = store.get_events("soil", Some(t(20)), Some(t(30))).expect("read");
    assert_eq!(
        bounded.into_iter().map(|s| s.value).collect::<Vec<_>>(),
        vec![Value::Int(2), Value::Int(3)]
    );

    let from_only = store.get_events("soil", Some(t(35)), None).expect("read");
    assert_eq!(from_only.len(), 1);

    let to_only = store.get_events("soil", None, Some(t(10))).expect("read");
    assert_eq!(to_only.len(), 1);
}

#[test]
fn default_timestamp_is_insertion_time() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let before = Utc::now() - chrono::Duration::seconds(2);
    store.write("lux", 1.0f32).expect("write");
    store.close(true).expect("close");
    let after = Utc::now() + chrono::Duration::seconds(2);

    let events = store.get_events("lux", None, None).expect("read");
    assert_eq!(events.len(), 1);
    assert!(events[0].timestamp >= before && events[0].timestamp <= after);
}

#[test]
fn legacy_untagged_rows_decode_as_bytes() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let conn = Connection::open(&path).expect("raw open");
    conn.execute(
        "INSERT INTO events (topic, data) VALUES ('legacy', x'31352e30')",
        [],
    )
    .expect("should insert legacy row");

    assert_eq!(values(&store, "legacy"), vec![Value::Bytes(b"15.0".to_vec())]);
}

#[test]
fn unknown_stored_tag_surfaces_codec_error() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let conn = Connection::open(&path).expect("raw open");
    conn.execute(
        "INSERT INTO events (topic, data, format_string) VALUES ('odd', x'00', 'Q')",
        [],
    )
    .expect("should insert row");

    let err = store.get_events("odd", None, None).expect_err("decode should fail");
    assert!(matches!(err, StoreError::Codec(_)), "unexpected error: {err:?}");
}

// ── ordering ─────────────────────────────────────────────────────────

#[test]
fn each_producer_keeps_submission_order() {
    let (_dir, path) = temp_db();
    let store = Arc::new(EventStore::open(&path, StoreConfig::default()).expect("open"));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..50 {
                    store.write(&format!("producer/{p}"), i).expect("write");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer should not panic");
    }
    store.close(true).expect("close");

    for p in 0..4 {
        let expected: Vec<Value> = (0..50).map(Value::Int).collect();
        assert_eq!(values(&store, &format!("producer/{p}")), expected);
    }
    assert_eq!(store.stats().committed, 200);
}

// ── close ────────────────────────────────────────────────────────────

#[test]
fn non_draining_close_accounts_for_every_write() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    for i in 0..500 {
        store.write("burst", i).expect("write");
    }
    store.close(false).expect("close");

    let stats = store.stats();
    assert_eq!(stats.committed + stats.discarded, 500);
    assert_eq!(values(&store, "burst").len() as u64, stats.committed);
}

#[test]
fn drained_close_keeps_at_least_as_much_as_non_drained() {
    let run = |drain: bool| {
        let (_dir, path) = temp_db();
        let store = EventStore::open(&path, StoreConfig::default()).expect("open");
        for i in 0..300 {
            store.write("t", i).expect("write");
        }
        store.close(drain).expect("close");
        values(&store, "t").len()
    };

    let drained = run(true);
    let undrained = run(false);
    assert_eq!(drained, 300);
    assert!(drained >= undrained);
}

#[test]
fn write_after_close_is_invalid_state() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");
    store.close(true).expect("close");

    let err = store.write("late", 1).expect_err("write should fail");
    assert!(matches!(
        err,
        StoreError::InvalidState {
            expected: Lifecycle::Running,
            actual: Lifecycle::Stopped
        }
    ));

    let err = store.close(true).expect_err("second close should fail");
    assert!(matches!(err, StoreError::InvalidState { .. }));
}

#[test]
fn drop_drains_pending_writes() {
    let (_dir, path) = temp_db();
    {
        let store = EventStore::open(&path, StoreConfig::default()).expect("open");
        for i in 0..20 {
            store.write("dropped_handle", i).expect("write");
        }
    }
    assert_eq!(count(&path, "SELECT COUNT(*) FROM events"), 20);
}

// ── sync mode ────────────────────────────────────────────────────────

#[test]
fn sync_writes_are_visible_immediately() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, config(WriteMode::Sync)).expect("open");
    assert_eq!(store.write_mode(), WriteMode::Sync);

    store.write("salt", 0.5f32).expect("write");
    assert_eq!(values(&store, "salt"), vec![Value::Float(0.5)]);
    assert_eq!(store.get_topics(), vec!["salt"]);

    store.close(false).expect("close");
    assert!(matches!(
        store.write("salt", 1.0f32),
        Err(StoreError::InvalidState { .. })
    ));
}

// ── failure policy ───────────────────────────────────────────────────

#[test]
fn failed_event_insert_is_dropped_and_counted() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let conn = Connection::open(&path).expect("raw open");
    conn.execute_batch(
        "CREATE TRIGGER reject_bad BEFORE INSERT ON events
         WHEN NEW.topic = 'bad'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .expect("should create trigger");

    store.write("bad", 1).expect("enqueue succeeds even if commit fails");
    store.write("good", 2).expect("write");
    store.close(true).expect("close");

    let stats = store.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.committed, 1);
    assert_eq!(store.get_topics(), vec!["good"]);
}

#[test]
fn topic_row_failure_keeps_event_row() {
    let (_dir, path) = temp_db();
    let store = EventStore::open(&path, StoreConfig::default()).expect("open");

    let conn = Connection::open(&path).expect("raw open");
    conn.execute_batch("DROP TABLE topics;").expect("should drop topics");

    store.write("orphan", 5).expect("write");
    store.close(true).expect("close");

    assert_eq!(values(&store, "orphan"), vec![Value::Int(5)]);
    assert_eq!(store.stats().committed, 1);
    // Listing degrades to empty rather than failing.
    assert!(store.get_topics().is_empty());
}

// ── timestamps ───────────────────────────────────────────────────────

#[test]
fn timestamp_format_matches_current_timestamp_layout() {
    let whole = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(format_timestamp(&whole), "2023-01-02 03:04:05");

    let fractional = whole + chrono::Duration::milliseconds(250);
    assert_eq!(format_timestamp(&fractional), "2023-01-02 03:04:05.250");

    assert_eq!(parse_timestamp("2023-01-02 03:04:05").unwrap(), whole);
    assert_eq!(parse_timestamp("2023-01-02 03:04:05.250").unwrap(), fractional);
    assert!(matches!(
        parse_timestamp("yesterday"),
        Err(StoreError::Timestamp(_))
    ));
}
