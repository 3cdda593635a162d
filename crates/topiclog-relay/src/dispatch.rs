//! Per-observer dispatch.
//!
//! Every registered observer gets its own worker task draining its own
//! unbounded queue. The receive loop only enqueues; each worker runs one
//! call at a time on the blocking pool. A blocked observer holds a single
//! blocking thread and backs up only its own queue, and a panicking one
//! loses only the call that panicked. Calls reach each observer in arrival
//! order.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::{JoinError, JoinSet};

/// Callback invoked with a newly observed topic.
pub type TopicObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked with every message's topic and payload.
pub type DataObserver = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// The registered observers. Append-only.
#[derive(Default)]
pub(crate) struct Observers {
    topic: RwLock<Vec<TopicObserver>>,
    data: RwLock<Vec<DataObserver>>,
}

impl Observers {
    pub fn add_topic(&self, observer: TopicObserver) {
        self.topic
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn add_data(&self, observer: DataObserver) {
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Topic observers registered at or after `index`.
    fn topic_from(&self, index: usize) -> Vec<TopicObserver> {
        let observers = self.topic.read().unwrap_or_else(|e| e.into_inner());
        observers.get(index..).unwrap_or_default().to_vec()
    }

    /// Data observers registered at or after `index`.
    fn data_from(&self, index: usize) -> Vec<DataObserver> {
        let observers = self.data.read().unwrap_or_else(|e| e.into_inner());
        observers.get(index..).unwrap_or_default().to_vec()
    }
}

/// Which kind of observer a worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchKind {
    NewTopic,
    NewData,
}

impl DispatchKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::NewTopic => "new_topic",
            Self::NewData => "new_data",
        }
    }
}

type DataJob = (Arc<str>, Arc<[u8]>);

/// Worker queues for the observers known to the receive loop.
pub(crate) struct Dispatcher {
    topic_queues: Vec<UnboundedSender<Arc<str>>>,
    data_queues: Vec<UnboundedSender<DataJob>>,
    workers: JoinSet<()>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            topic_queues: Vec::new(),
            data_queues: Vec::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queues `topic` for every topic observer.
    pub fn new_topic(&mut self, observers: &Observers, topic: &Arc<str>) {
        for observer in observers.topic_from(self.topic_queues.len()) {
            let index = self.topic_queues.len();
            let queue = spawn_worker(
                &mut self.workers,
                DispatchKind::NewTopic,
                index,
                move |name: Arc<str>| observer(&name),
            );
            self.topic_queues.push(queue);
        }

        for queue in &self.topic_queues {
            // A closed queue means its worker is gone; nothing to deliver to.
            let _ = queue.send(Arc::clone(topic));
        }
    }

    /// Queues the message for every data observer.
    pub fn new_data(&mut self, observers: &Observers, topic: &Arc<str>, payload: &Arc<[u8]>) {
        for observer in observers.data_from(self.data_queues.len()) {
            let index = self.data_queues.len();
            let queue = spawn_worker(
                &mut self.workers,
                DispatchKind::NewData,
                index,
                move |(name, payload): DataJob| observer(&name, &payload),
            );
            self.data_queues.push(queue);
        }

        for queue in &self.data_queues {
            let _ = queue.send((Arc::clone(topic), Arc::clone(payload)));
        }
    }

    /// Number of running observer workers.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Closes every queue and waits up to `timeout` for the workers to
    /// deliver what is already queued. Workers still busy after that are
    /// cancelled: no further calls start, and a call already running on the
    /// blocking pool is detached and finishes untracked.
    pub async fn drain(mut self, timeout: Duration) {
        self.topic_queues.clear();
        self.data_queues.clear();

        let workers = &mut self.workers;
        let finished = tokio::time::timeout(timeout, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "observer worker failed");
                }
            }
        })
        .await;

        if finished.is_err() {
            tracing::warn!(
                remaining = self.workers.len(),
                timeout_ms = timeout.as_millis() as u64,
                "observers still busy after drain timeout, detaching"
            );
            self.workers.abort_all();
            // Cancellation lands at the workers' next await point.
            while self.workers.join_next().await.is_some() {}
        }
    }
}

fn spawn_worker<J, F>(
    workers: &mut JoinSet<()>,
    kind: DispatchKind,
    index: usize,
    call: F,
) -> UnboundedSender<J>
where
    J: Send + 'static,
    F: Fn(J) + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<J>();
    let call = Arc::new(call);

    workers.spawn(async move {
        while let Some(job) = rx.recv().await {
            let call = Arc::clone(&call);
            let result = tokio::task::spawn_blocking(move || call(job)).await;
            log_result(kind, index, result);
        }
        tracing::trace!(observer = kind.as_str(), index, "observer worker stopped");
    });

    tx
}

fn log_result(kind: DispatchKind, index: usize, result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            tracing::error!(observer = kind.as_str(), index, error = %e, "observer panicked");
        }
        Err(e) => {
            tracing::warn!(
                observer = kind.as_str(),
                index,
                error = %e,
                "observer call cancelled"
            );
        }
    }
}
