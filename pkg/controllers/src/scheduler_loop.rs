use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pkg_constants::state::{KIND_COMPOSITE_ELASTIC_QUOTAS, KIND_ELASTIC_QUOTAS, KIND_PODS};
use pkg_metrics::{MetricsRegistry, PREEMPTION_ATTEMPTS, PREFILTER_REJECTIONS, QUOTAS};
use pkg_scheduler::{ClusterSnapshot, QuotaInfo, ScheduleResult, Scheduler};
use pkg_state::{EventType, StateStore, WatchEvent};
use pkg_types::{CompositeElasticQuota, ElasticQuota, Node, Pod, PodDisruptionBudget, PodPhase};

/// Feeds store events into the scheduler's quota registry and schedules
/// pending pods on every tick: binds, or evicts victims and nominates.
pub struct SchedulerController {
    store: StateStore,
    scheduler: Arc<Scheduler>,
    metrics: Arc<MetricsRegistry>,
    interval: Duration,
}

impl SchedulerController {
    pub fn new(
        store: StateStore,
        scheduler: Arc<Scheduler>,
        metrics: Arc<MetricsRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            metrics,
            interval,
        }
    }

    /// Start the controller loop as a background task.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "SchedulerController started (interval={}ms)",
                self.interval.as_millis()
            );
            let mut event_rx = self.store.event_log.subscribe();
            if let Err(e) = self.sync_quotas().await {
                warn!("SchedulerController initial quota sync error: {}", e);
            }
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.schedule_pending().await {
                            warn!("SchedulerController schedule error: {}", e);
                        }
                    }
                    result = event_rx.recv() => match result {
                        Ok(event) => self.handle_event(&event),
                        Err(RecvError::Lagged(n)) => {
                            warn!("SchedulerController lagged {} events, resyncing quotas", n);
                            if let Err(e) = self.sync_quotas().await {
                                warn!("SchedulerController quota sync error: {}", e);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            info!("SchedulerController stopped");
        })
    }

    /// Rebuild the registry from the stored quotas, dropping any whose
    /// delete event was missed. Pod usage is rebuilt by the next scheduling
    /// pass.
    pub async fn sync_quotas(&self) -> anyhow::Result<()> {
        let simple = self.store.list_objects::<ElasticQuota>(None).await?;
        let composite = self.store.list_objects::<CompositeElasticQuota>(None).await?;
        let capacity = self.scheduler.capacity();
        capacity.replace_quotas(
            simple
                .iter()
                .map(QuotaInfo::from)
                .chain(composite.iter().map(QuotaInfo::from)),
        );
        self.metrics.gauge_set(QUOTAS, capacity.quota_count() as i64);
        Ok(())
    }

    pub fn handle_event(&self, event: &WatchEvent) {
        let capacity = self.scheduler.capacity();
        match event.kind() {
            Some(KIND_ELASTIC_QUOTAS) => {
                let old = event.decode_prev::<ElasticQuota>().map(|q| QuotaInfo::from(&q));
                let new = event.decode_value::<ElasticQuota>().map(|q| QuotaInfo::from(&q));
                apply_quota_event(capacity, event.event_type, old, new);
            }
            Some(KIND_COMPOSITE_ELASTIC_QUOTAS) => {
                let old = event
                    .decode_prev::<CompositeElasticQuota>()
                    .map(|q| QuotaInfo::from(&q));
                let new = event
                    .decode_value::<CompositeElasticQuota>()
                    .map(|q| QuotaInfo::from(&q));
                apply_quota_event(capacity, event.event_type, old, new);
            }
            Some(KIND_PODS) => {
                let old = event.decode_prev::<Pod>();
                let new = event.decode_value::<Pod>();
                match (event.event_type, old, new) {
                    (EventType::Added, _, Some(pod)) => capacity.add_pod(&pod),
                    (EventType::Modified, Some(old), Some(new)) => capacity.update_pod(&old, &new),
                    (EventType::Modified, None, Some(new)) => capacity.add_pod(&new),
                    (EventType::Deleted, Some(pod), _) => {
                        if pod.is_assigned() {
                            capacity.delete_pod(&pod);
                        }
                    }
                    _ => {}
                }
                return;
            }
            _ => return,
        }
        self.metrics.gauge_set(QUOTAS, capacity.quota_count() as i64);
    }

    /// One pass over pending pods, highest priority first.
    pub async fn schedule_pending(&self) -> anyhow::Result<()> {
        let nodes = self.store.list_objects::<Node>(None).await?;
        let mut pods = self.store.list_objects::<Pod>(None).await?;
        let pdbs = self.store.list_objects::<PodDisruptionBudget>(None).await?;
        let capacity = self.scheduler.capacity();
        capacity.resync_pods(&pods);

        let mut pending: Vec<Pod> = pods
            .iter()
            .filter(|p| !p.is_assigned() && p.phase == PodPhase::Pending && !p.is_terminating())
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by(|a, b| a.more_important_than(b));

        for pod in pending {
            let cluster = ClusterSnapshot::build(nodes.clone(), &pods, capacity.calculator());
            match self.scheduler.schedule_one(&pod, &cluster, &pdbs) {
                ScheduleResult::Scheduled { node } => {
                    let mut bound = pod.clone();
                    bound.node_name = Some(node.clone());
                    bound.nominated_node_name = None;
                    match self.store.patch_object(&pod, &bound).await {
                        Ok(Some(stored)) => {
                            info!("Bound pod {} → node {}", pod.key(), node);
                            replace_pod(&mut pods, stored);
                        }
                        Ok(None) => {
                            capacity.unreserve(&pod, &node);
                            debug!("Pod {} vanished before bind", pod.key());
                        }
                        Err(e) => {
                            capacity.unreserve(&pod, &node);
                            warn!("Failed to bind pod {} to {}: {}", pod.key(), node, e);
                        }
                    }
                }
                ScheduleResult::Preempting { node, victims } => {
                    self.metrics.counter_inc(PREEMPTION_ATTEMPTS);
                    for victim in &victims {
                        if self
                            .store
                            .delete_object::<Pod>(&victim.namespace, &victim.name)
                            .await?
                        {
                            info!("Preempted pod {} on {} for {}", victim.key(), node, pod.key());
                        }
                        pods.retain(|p| p.key() != victim.key());
                    }
                    let mut nominated = pod.clone();
                    nominated.nominated_node_name = Some(node);
                    if let Some(stored) = self.store.patch_object(&pod, &nominated).await? {
                        replace_pod(&mut pods, stored);
                    }
                }
                ScheduleResult::Unschedulable {
                    status,
                    rejected_in_pre_filter,
                    preemption_status,
                } => {
                    if rejected_in_pre_filter {
                        self.metrics.counter_inc(PREFILTER_REJECTIONS);
                    }
                    if preemption_status.is_some() {
                        self.metrics.counter_inc(PREEMPTION_ATTEMPTS);
                    }
                    debug!(
                        "Pod {} unschedulable: {} (preemption: {})",
                        pod.key(),
                        status.message(),
                        preemption_status
                            .map(|s| s.message())
                            .unwrap_or_else(|| "not attempted".to_string())
                    );
                }
            }
        }
        Ok(())
    }
}

fn apply_quota_event(
    capacity: &pkg_scheduler::CapacityScheduling,
    event_type: EventType,
    old: Option<QuotaInfo>,
    new: Option<QuotaInfo>,
) {
    match (event_type, old, new) {
        (EventType::Added, _, Some(new)) => capacity.add_quota(new),
        (EventType::Modified, Some(old), Some(new)) => capacity.update_quota(&old, new),
        (EventType::Modified, None, Some(new)) => capacity.add_quota(new),
        (EventType::Deleted, Some(old), _) => capacity.delete_quota(&old),
        _ => {}
    }
}

fn replace_pod(pods: &mut [Pod], updated: Pod) {
    if let Some(slot) = pods.iter_mut().find(|p| p.key() == updated.key()) {
        *slot = updated;
    }
}
