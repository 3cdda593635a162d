//! End-to-end: broker messages through the relay into the store, the live
//! table, and the broadcast channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use topiclog_codec::Value;
use topiclog_relay::{
    Broker, BrokerError, BrokerEvent, InboundMessage, Relay, RelayConfig, TopicFilter,
};
use topiclog_server::live::LiveTable;
use topiclog_server::payload::PayloadMode;
use topiclog_server::{ingest, AppState};
use topiclog_store::{EventStore, StoreConfig};

struct ChannelBroker {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn subscribe(&mut self, _filter: &TopicFilter) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn next_event(&mut self) -> Result<BrokerEvent, BrokerError> {
        self.rx
            .recv()
            .await
            .map(BrokerEvent::Message)
            .ok_or(BrokerError::Closed)
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}

fn message(topic: &str, payload: &[u8]) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: payload.to_vec(),
        qos: 0,
        retain: false,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn messages_reach_store_live_table_and_stream() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        EventStore::open(dir.path().join("events.db"), StoreConfig::default()).unwrap(),
    );
    let state = AppState::new(Arc::clone(&store), LiveTable::new(10), 16);
    let mut samples = state.live_tx.subscribe();

    let (tx, rx) = mpsc::unbounded_channel();
    let config = RelayConfig {
        filter: TopicFilter::new("otsensor/#").unwrap(),
        ..RelayConfig::default()
    };
    let relay = Relay::new(ChannelBroker { rx }, config);
    ingest::attach(&relay, &state, PayloadMode::Auto);
    relay.initialise().await.unwrap();

    tx.send(message("otsensor/temp", b"21.5")).unwrap();
    tx.send(message("otsensor/state", b"\"on\"")).unwrap();
    tx.send(message("otsensor/raw", &[0xff, 0x00])).unwrap();
    tx.send(message("elsewhere/temp", b"1")).unwrap();

    wait_until(|| store.stats().committed == 3).await;
    wait_until(|| state.live.topics().len() == 3).await;
    relay.uninitialise().await.unwrap();
    store.close(true).unwrap();

    assert_eq!(
        store.get_topics(),
        vec!["otsensor/raw", "otsensor/state", "otsensor/temp"]
    );
    let temp = store.get_events("otsensor/temp", None, None).unwrap();
    assert_eq!(temp.len(), 1);
    assert_eq!(temp[0].value, Value::Float(21.5));
    let state_events = store.get_events("otsensor/state", None, None).unwrap();
    assert_eq!(state_events[0].value, Value::Text("on".to_string()));
    let raw = store.get_events("otsensor/raw", None, None).unwrap();
    assert_eq!(raw[0].value, Value::Bytes(vec![0xff, 0x00]));

    assert_eq!(
        state.live.latest("otsensor/temp").unwrap().value,
        Value::Float(21.5)
    );
    assert!(state.live.samples("elsewhere/temp").is_none());

    let mut streamed = Vec::new();
    while let Ok(sample) = samples.try_recv() {
        streamed.push(sample.topic);
    }
    streamed.sort();
    assert_eq!(
        streamed,
        vec!["otsensor/raw", "otsensor/state", "otsensor/temp"]
    );
}

#[tokio::test]
async fn raw_mode_stores_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        EventStore::open(dir.path().join("events.db"), StoreConfig::default()).unwrap(),
    );
    let state = AppState::new(Arc::clone(&store), LiveTable::new(10), 16);

    let (tx, rx) = mpsc::unbounded_channel();
    let relay = Relay::new(ChannelBroker { rx }, RelayConfig::default());
    ingest::attach(&relay, &state, PayloadMode::Raw);
    relay.initialise().await.unwrap();

    tx.send(message("t", b"21.5")).unwrap();
    wait_until(|| store.stats().committed == 1).await;
    relay.uninitialise().await.unwrap();
    store.close(true).unwrap();

    let events = store.get_events("t", None, None).unwrap();
    assert_eq!(events[0].value, Value::Bytes(b"21.5".to_vec()));
}
