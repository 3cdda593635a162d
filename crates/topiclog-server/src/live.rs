//! The live table: the most recent samples per topic, kept in memory for
//! dashboards.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use topiclog_codec::Value;
use topiclog_store::Sample;

/// A sample pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSample {
    /// The topic the sample arrived on.
    pub topic: String,
    /// Arrival time (UTC).
    pub timestamp: DateTime<Utc>,
    /// The interpreted payload.
    pub value: Value,
}

/// Topic name to a bounded ring of recent samples.
///
/// Cloning is cheap and every clone shares the same table.
#[derive(Debug, Clone)]
pub struct LiveTable {
    inner: Arc<RwLock<BTreeMap<String, VecDeque<Sample>>>>,
    capacity: usize,
}

impl LiveTable {
    /// Creates an empty table keeping at most `capacity` samples per topic.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BTreeMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Ensures `topic` has an entry, without adding samples.
    pub fn add_topic(&self, topic: &str) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !table.contains_key(topic) {
            table.insert(topic.to_string(), VecDeque::new());
        }
    }

    /// Appends a sample, evicting the oldest one when the ring is full.
    pub fn push(&self, topic: &str, sample: Sample) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let ring = table.entry(topic.to_string()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// Known topics, ascending.
    pub fn topics(&self) -> Vec<String> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table.keys().cloned().collect()
    }

    /// Snapshot of the samples for `topic`, oldest first. `None` if the
    /// topic has never been seen.
    pub fn samples(&self, topic: &str) -> Option<Vec<Sample>> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table.get(topic).map(|ring| ring.iter().cloned().collect())
    }

    /// Most recent sample for `topic`.
    pub fn latest(&self, topic: &str) -> Option<Sample> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table.get(topic).and_then(|ring| ring.back().cloned())
    }
}
