//! topiclog server binary.
//!
//! Opens the event log, subscribes to the broker, serves the query API, and
//! shuts everything down in order on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use topiclog_relay::Relay;
use topiclog_server::config::{self, Config};
use topiclog_server::live::LiveTable;
use topiclog_server::mqtt::MqttBroker;
use topiclog_server::{app, ingest, AppState};
use topiclog_store::EventStore;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TOPICLOG_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let store = EventStore::open(&config.store.path, config.store.store_config())
        .expect("failed to open event log; check store.path in config");
    let store = Arc::new(store);

    let state = AppState::new(
        Arc::clone(&store),
        LiveTable::new(config.live.samples_per_topic),
        config.live.broadcast_capacity,
    );
    ingest::seed_live_table(&state);

    let relay = Relay::new(MqttBroker::new(&config.mqtt), config.mqtt.relay_config());
    ingest::attach(&relay, &state, config.store.payload_mode);

    if let Err(e) = relay.initialise().await {
        tracing::error!(
            host = %config.mqtt.host,
            port = config.mqtt.port,
            error = %e,
            "failed to start relay"
        );
        close_store(store, config.store.drain_on_shutdown).await;
        std::process::exit(1);
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, "starting topiclog server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    let shutdown_state = state.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let signal = shutdown_signal().await;
            tracing::info!(signal, "stop requested, closing live streams and http");
            shutdown_state.begin_shutdown();
        })
        .await
        .expect("server error");

    if let Err(e) = relay.uninitialise().await {
        tracing::warn!(error = %e, "relay did not stop cleanly");
    }
    close_store(store, config.store.drain_on_shutdown).await;

    tracing::info!("topiclog server shut down");
}

/// Closes the store off the async runtime; a draining close blocks until
/// the writer queue is empty.
async fn close_store(store: Arc<EventStore>, drain: bool) {
    let result = tokio::task::spawn_blocking(move || store.close(drain)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "event log close failed"),
        Err(e) => tracing::error!(error = %e, "event log close task failed"),
    }
}

/// Resolves with the name of the first stop signal received.
///
/// A signal whose listener cannot be installed is logged and never fires.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                name = interrupt() => name,
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                interrupt().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        interrupt().await
    }
}

async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
