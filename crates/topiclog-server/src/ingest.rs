//! Observers that connect the relay to the store and the live table.

use chrono::Utc;
use topiclog_relay::{Broker, Relay};
use topiclog_store::Sample;

use crate::live::LiveSample;
use crate::payload::{interpret, PayloadMode};
use crate::AppState;

/// Registers the topic and data observers on `relay`.
///
/// Every message is interpreted per `mode`, written to the store, pushed
/// into the live table, and broadcast to SSE subscribers. Store failures are
/// logged and never stop the other two.
pub fn attach<B: Broker>(relay: &Relay<B>, state: &AppState, mode: PayloadMode) {
    let live = state.live.clone();
    relay.register_new_topic_observer(move |topic| {
        tracing::info!(topic = %topic, "new topic");
        live.add_topic(topic);
    });

    let state = state.clone();
    relay.register_new_data_observer(move |topic, payload| {
        let value = interpret(payload, mode);
        let timestamp = Utc::now();

        if let Err(e) = state.store.write_at(topic, value.clone(), timestamp) {
            tracing::error!(
                topic = %topic,
                kind = value.kind(),
                error = %e,
                "failed to store event"
            );
        }

        state.live.push(
            topic,
            Sample {
                timestamp,
                value: value.clone(),
            },
        );

        // No receivers just means no dashboard is connected.
        let _ = state.live_tx.send(LiveSample {
            topic: topic.to_string(),
            timestamp,
            value,
        });
    });
}

/// Adds every topic already in the store to the live table, so dashboards
/// list them before their next message arrives. Returns how many were added.
pub fn seed_live_table(state: &AppState) -> usize {
    let topics = state.store.get_topics();
    for topic in &topics {
        state.live.add_topic(topic);
    }
    tracing::info!(count = topics.len(), "seeded live table from stored topics");
    topics.len()
}
