//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use topiclog_relay::{RelayConfig, TopicFilter};
use topiclog_store::{StoreConfig, WriteMode};

use crate::payload::PayloadMode;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Event store settings.
    #[serde(default)]
    pub store: StoreSection,

    /// Broker connection and subscription settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Live table settings.
    #[serde(default)]
    pub live: LiveConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Event store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Path to the SQLite event log.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// `async` (background writer) or `sync` (inline commits).
    #[serde(default)]
    pub write_mode: WriteMode,

    /// How inbound payloads are turned into stored values.
    #[serde(default)]
    pub payload_mode: PayloadMode,

    /// Whether shutdown waits for queued writes to commit.
    #[serde(default = "default_true")]
    pub drain_on_shutdown: bool,

    /// How long to wait for the writer to start, in milliseconds.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled reader connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker host name.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Subscription filter.
    #[serde(default)]
    pub topic_filter: TopicFilter,

    /// Keep-alive interval, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Pause between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Re-apply the subscription after a reconnect without a stored session.
    #[serde(default = "default_true")]
    pub resubscribe_on_reconnect: bool,

    /// How long shutdown waits for in-flight observers, in milliseconds.
    #[serde(default = "default_dispatch_drain_timeout_ms")]
    pub dispatch_drain_timeout_ms: u64,

    /// Request channel capacity of the MQTT client.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Live table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Most recent samples kept per topic.
    #[serde(default = "default_samples_per_topic")]
    pub samples_per_topic: usize,

    /// Buffer of the SSE broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "topiclog_store=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8050
}

fn default_db_path() -> String {
    "topiclog.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "topiclog".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_dispatch_drain_timeout_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    64
}

fn default_samples_per_topic() -> usize {
    200
}

fn default_broadcast_capacity() -> usize {
    1_024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            write_mode: WriteMode::default(),
            payload_mode: PayloadMode::default(),
            drain_on_shutdown: true,
            startup_timeout_ms: default_startup_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topic_filter: TopicFilter::default(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            resubscribe_on_reconnect: true,
            dispatch_drain_timeout_ms: default_dispatch_drain_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            samples_per_topic: default_samples_per_topic(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl StoreSection {
    /// Converts this section into the store's open-time settings.
    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig {
            write_mode: self.write_mode,
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            ..StoreConfig::default()
        };
        config.db.busy_timeout_ms = self.busy_timeout_ms;
        config.db.pool_max_size = self.pool_max_size;
        config
    }
}

impl MqttConfig {
    /// Converts this section into relay settings.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            filter: self.topic_filter.clone(),
            resubscribe_on_reconnect: self.resubscribe_on_reconnect,
            dispatch_drain_timeout: Duration::from_millis(self.dispatch_drain_timeout_ms),
            error_backoff: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds an unusable value.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// The offending variable.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TOPICLOG_DB_PATH` overrides `store.path`
/// - `TOPICLOG_MQTT_HOST` overrides `mqtt.host`
/// - `TOPICLOG_MQTT_PORT` overrides `mqtt.port`
/// - `TOPICLOG_TOPIC_FILTER` overrides `mqtt.topic_filter`
/// - `TOPICLOG_HOST` overrides `server.host`
/// - `TOPICLOG_PORT` overrides `server.port`
/// - `TOPICLOG_LOG_LEVEL` overrides `logging.level`
/// - `TOPICLOG_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if `TOPICLOG_TOPIC_FILTER` is not a valid filter.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(config, |name| std::env::var(name).ok())
}

/// Applies `TOPICLOG_*` overrides read through `var`.
///
/// Unparseable host and port values are ignored, as are unset variables.
pub fn apply_env_overrides(
    mut config: Config,
    var: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(db_path) = var("TOPICLOG_DB_PATH") {
        config.store.path = db_path;
    }
    if let Some(host) = var("TOPICLOG_MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = var("TOPICLOG_MQTT_PORT") {
        if let Ok(parsed) = port.parse() {
            config.mqtt.port = parsed;
        }
    }
    if let Some(filter) = var("TOPICLOG_TOPIC_FILTER") {
        config.mqtt.topic_filter =
            TopicFilter::new(filter).map_err(|e| ConfigError::InvalidEnv {
                var: "TOPICLOG_TOPIC_FILTER",
                reason: e.to_string(),
            })?;
    }
    if let Some(host) = var("TOPICLOG_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("TOPICLOG_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("TOPICLOG_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("TOPICLOG_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
