use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pkg_metrics::{MetricsRegistry, RECONCILIATIONS};
use pkg_state::{StateStore, WatchEvent};
use pkg_types::ObjectKey;

use crate::queue::WorkQueue;

/// One controller's reconciliation logic. The runner owns the loop, the
/// queue and retries.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Bring the object named by `key` in line with the cluster. A missing
    /// object is not an error.
    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()>;

    /// Keys a watch event should enqueue. Most events map to nothing.
    async fn keys_for_event(&self, event: &WatchEvent) -> anyhow::Result<Vec<ObjectKey>>;

    /// Every key this controller owns, for periodic resync.
    async fn all_keys(&self) -> anyhow::Result<Vec<ObjectKey>>;
}

/// Drives a [`Reconciler`] from store events and a resync timer, one key at
/// a time. Failed keys are retried with exponential backoff.
pub struct Controller<R: Reconciler> {
    store: StateStore,
    reconciler: Arc<R>,
    metrics: Arc<MetricsRegistry>,
    resync_interval: Duration,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(store: StateStore, reconciler: R, metrics: Arc<MetricsRegistry>, resync_interval: Duration) -> Self {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            metrics,
            resync_interval,
        }
    }

    /// Start the controller loop as a background task. It stops when
    /// `shutdown` flips to true or its sender goes away.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let name = self.reconciler.name().to_string();
            info!(
                "{} started (resync={}s)",
                name,
                self.resync_interval.as_secs()
            );
            let mut event_rx = self.store.event_log.subscribe();
            let mut interval = tokio::time::interval(self.resync_interval);
            let mut queue = WorkQueue::new();

            loop {
                while let Some(key) = queue.pop() {
                    self.process(&mut queue, key).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }

                let deadline = queue.next_deadline();
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => self.enqueue_all(&mut queue).await,
                    result = event_rx.recv() => match result {
                        Ok(event) => self.enqueue_event(&mut queue, &event).await,
                        Err(RecvError::Lagged(n)) => {
                            warn!("{} lagged {} events, resyncing", name, n);
                            self.enqueue_all(&mut queue).await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sleep_until(deadline) => {}
                }
            }
            info!("{} stopped", name);
        })
    }

    async fn process(&self, queue: &mut WorkQueue, key: ObjectKey) {
        self.metrics.counter_inc(RECONCILIATIONS);
        match self.reconciler.reconcile(&key).await {
            Ok(()) => queue.forget(&key),
            Err(e) => {
                let delay = queue.add_rate_limited(key.clone());
                warn!(
                    "{} reconcile error for {}: {} (retry in {}ms)",
                    self.reconciler.name(),
                    key,
                    e,
                    delay.as_millis()
                );
            }
        }
    }

    async fn enqueue_all(&self, queue: &mut WorkQueue) {
        match self.reconciler.all_keys().await {
            Ok(keys) => keys.into_iter().for_each(|k| queue.add(k)),
            Err(e) => warn!("{} resync list error: {}", self.reconciler.name(), e),
        }
    }

    async fn enqueue_event(&self, queue: &mut WorkQueue, event: &WatchEvent) {
        match self.reconciler.keys_for_event(event).await {
            Ok(keys) => {
                for key in keys {
                    debug!("{} enqueue {} for {}", self.reconciler.name(), key, event.key);
                    queue.add(key);
                }
            }
            Err(e) => warn!(
                "{} failed to map event {}: {}",
                self.reconciler.name(),
                event.key,
                e
            ),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
