//! The relay lifecycle and its receive loop.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::broker::{Broker, BrokerEvent, InboundMessage};
use crate::dispatch::{DataObserver, Dispatcher, Observers, TopicObserver};
use crate::error::{BrokerError, RelayError};
use crate::filter::TopicFilter;

/// Lifecycle of a [`Relay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Not connected. Observers may be registered.
    Uninitialised,
    /// `initialise` is connecting and subscribing.
    Connecting,
    /// The receive loop is running.
    Running,
    /// `uninitialise` is stopping the receive loop.
    Disconnecting,
}

impl RelayState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialised => "uninitialised",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Topics to subscribe to. Messages outside it are ignored.
    pub filter: TopicFilter,
    /// Re-apply the subscription after a reconnect without a stored session.
    pub resubscribe_on_reconnect: bool,
    /// How long `uninitialise` waits for in-flight observers.
    pub dispatch_drain_timeout: Duration,
    /// Pause after a transient receive error before polling again.
    pub error_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            filter: TopicFilter::default(),
            resubscribe_on_reconnect: true,
            dispatch_drain_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

struct Running<B> {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<B>,
}

struct Inner<B> {
    /// Present while idle; moved into the receive loop while running.
    broker: Option<B>,
    running: Option<Running<B>>,
}

/// Shared between the relay handle and its receive loop.
struct LoopContext {
    filter: TopicFilter,
    resubscribe_on_reconnect: bool,
    error_backoff: Duration,
    observers: Arc<Observers>,
    observed: Arc<Mutex<BTreeSet<String>>>,
}

/// Subscribes to a broker and fans every message out to the registered
/// observers.
///
/// The first message seen on a topic since the last `initialise` triggers
/// the new-topic observers; every message triggers the new-data observers.
/// Each observer has its own queue and worker, and is called in arrival
/// order.
pub struct Relay<B: Broker> {
    config: RelayConfig,
    state: Mutex<RelayState>,
    observers: Arc<Observers>,
    observed: Arc<Mutex<BTreeSet<String>>>,
    inner: tokio::sync::Mutex<Inner<B>>,
}

impl<B: Broker> fmt::Debug for Relay<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("filter", &self.config.filter)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<B: Broker> Relay<B> {
    /// Creates an uninitialised relay around `broker`.
    pub fn new(broker: B, config: RelayConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RelayState::Uninitialised),
            observers: Arc::new(Observers::default()),
            observed: Arc::new(Mutex::new(BTreeSet::new())),
            inner: tokio::sync::Mutex::new(Inner {
                broker: Some(broker),
                running: None,
            }),
        }
    }

    /// Registers a callback for the first message on each topic.
    pub fn register_new_topic_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let observer: TopicObserver = Arc::new(observer);
        self.observers.add_topic(observer);
    }

    /// Registers a callback for every message.
    pub fn register_new_data_observer<F>(&self, observer: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let observer: DataObserver = Arc::new(observer);
        self.observers.add_data(observer);
    }

    /// Connects, subscribes, and starts the receive loop.
    ///
    /// On a connect or subscribe failure the relay returns to
    /// [`RelayState::Uninitialised`] and may be initialised again.
    pub async fn initialise(&self) -> Result<(), RelayError> {
        self.transition(RelayState::Uninitialised, RelayState::Connecting)?;

        let mut inner = self.inner.lock().await;
        let Some(mut broker) = inner.broker.take() else {
            self.set_state(RelayState::Uninitialised);
            return Err(RelayError::BrokerUnavailable);
        };

        if let Err(e) = broker.connect().await {
            tracing::error!(error = %e, "relay connect failed");
            inner.broker = Some(broker);
            self.set_state(RelayState::Uninitialised);
            return Err(RelayError::Connect(e));
        }

        if let Err(e) = broker.subscribe(&self.config.filter).await {
            tracing::error!(filter = %self.config.filter, error = %e, "relay subscribe failed");
            if let Err(e) = broker.disconnect().await {
                tracing::warn!(error = %e, "disconnect after failed subscribe");
            }
            inner.broker = Some(broker);
            self.set_state(RelayState::Uninitialised);
            return Err(RelayError::Subscribe(e));
        }

        lock(&self.observed).clear();

        let ctx = LoopContext {
            filter: self.config.filter.clone(),
            resubscribe_on_reconnect: self.config.resubscribe_on_reconnect,
            error_backoff: self.config.error_backoff,
            observers: Arc::clone(&self.observers),
            observed: Arc::clone(&self.observed),
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(receive_loop(
            broker,
            ctx,
            shutdown_rx,
            self.config.dispatch_drain_timeout,
        ));
        inner.running = Some(Running { shutdown, handle });

        self.set_state(RelayState::Running);
        tracing::info!(filter = %self.config.filter, "relay running");
        Ok(())
    }

    /// Stops the receive loop and disconnects.
    ///
    /// Returns once the loop has exited and in-flight observers have
    /// finished or been detached. No observer call starts after this
    /// returns.
    pub async fn uninitialise(&self) -> Result<(), RelayError> {
        self.transition(RelayState::Running, RelayState::Disconnecting)?;

        let mut inner = self.inner.lock().await;
        let result = match inner.running.take() {
            Some(running) => {
                // The loop may already be waiting on a closed broker.
                let _ = running.shutdown.send(());
                match running.handle.await {
                    Ok(broker) => {
                        inner.broker = Some(broker);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "relay receive loop failed");
                        Err(RelayError::Join(e.to_string()))
                    }
                }
            }
            None => Ok(()),
        };

        self.set_state(RelayState::Uninitialised);
        tracing::info!("relay stopped");
        result
    }

    /// Topics seen since the last `initialise`, sorted.
    pub fn observed_topics(&self) -> Vec<String> {
        lock(&self.observed).iter().cloned().collect()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        *lock(&self.state)
    }

    /// The relay's settings.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn transition(&self, from: RelayState, to: RelayState) -> Result<(), RelayError> {
        let mut state = lock(&self.state);
        if *state != from {
            return Err(RelayError::InvalidState {
                expected: from,
                actual: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: RelayState) {
        *lock(&self.state) = to;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn receive_loop<B: Broker>(
    mut broker: B,
    ctx: LoopContext,
    mut shutdown: oneshot::Receiver<()>,
    drain_timeout: Duration,
) -> B {
    let mut dispatcher = Dispatcher::new();

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = broker.next_event() => event,
        };

        match event {
            Ok(BrokerEvent::Message(message)) => ctx.on_message(&mut dispatcher, message),
            Ok(BrokerEvent::Reconnected { session_present }) => {
                tracing::info!(session_present, "broker reconnected");
                if !session_present && ctx.resubscribe_on_reconnect {
                    if let Err(e) = broker.subscribe(&ctx.filter).await {
                        tracing::error!(filter = %ctx.filter, error = %e, "resubscribe failed");
                    }
                }
            }
            Ok(BrokerEvent::ConnectionLost(reason)) => {
                tracing::warn!(reason = %reason, "broker connection lost");
            }
            Err(BrokerError::Closed) => {
                tracing::warn!("broker event stream closed, waiting for shutdown");
                let _ = (&mut shutdown).await;
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "broker receive failed");
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(ctx.error_backoff) => {}
                }
            }
        }
    }

    if let Err(e) = broker.disconnect().await {
        tracing::warn!(error = %e, "broker disconnect failed");
    }

    tracing::debug!(workers = dispatcher.workers(), "draining observer queues");
    dispatcher.drain(drain_timeout).await;
    broker
}

impl LoopContext {
    fn on_message(&self, dispatcher: &mut Dispatcher, message: InboundMessage) {
        if !self.filter.matches(&message.topic) {
            tracing::debug!(topic = %message.topic, "ignoring message outside filter");
            return;
        }

        let topic: Arc<str> = Arc::from(message.topic);
        let first_seen = lock(&self.observed).insert(topic.to_string());
        if first_seen {
            tracing::info!(topic = %topic, "new topic observed");
            dispatcher.new_topic(&self.observers, &topic);
        }

        let payload: Arc<[u8]> = Arc::from(message.payload);
        dispatcher.new_data(&self.observers, &topic, &payload);
    }
}
