//! topiclog server library logic: configuration, the MQTT adapter, the
//! observers that feed the store and the live table, and the HTTP API.

pub mod api;
pub mod config;
pub mod ingest;
pub mod live;
pub mod mqtt;
pub mod payload;

use axum::{routing::get, Extension, Json, Router};
use live::{LiveSample, LiveTable};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use topiclog_store::EventStore;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared by the observers and the request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The durable event log.
    pub store: Arc<EventStore>,
    /// Recent samples per topic.
    pub live: LiveTable,
    /// Broadcast channel feeding the SSE stream.
    pub live_tx: broadcast::Sender<LiveSample>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Creates the state around an opened store.
    pub fn new(store: Arc<EventStore>, live: LiveTable, broadcast_capacity: usize) -> Self {
        let (live_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            live,
            live_tx,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Ends every open SSE stream so graceful shutdown can complete.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let stats = state.store.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": {
            "state": state.store.state().as_str(),
            "committed": stats.committed,
            "dropped": stats.dropped,
            "discarded": stats.discarded,
        }
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/topics", get(api::get_topics_handler))
        .route("/api/events", get(api::get_events_handler))
        .route("/api/live", get(api::get_live_handler))
        .route("/events/stream", get(api::get_event_stream_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
