use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use pkg_constants::state::{KIND_ELASTIC_QUOTAS, KIND_PODS};
use pkg_gpu::ResourceCalculator;
use pkg_metrics::MetricsRegistry;
use pkg_state::{StateStore, WatchEvent};
use pkg_types::object::Object;
use pkg_types::{ElasticQuota, ObjectKey};

use crate::capacity::{apply_capacity_labels, plan_capacity, running_pods};
use crate::predicate::{event_pod, pod_event_moves_usage};
use crate::runner::Reconciler;

/// Keeps `status.used` of each ElasticQuota and the capacity-info labels of
/// the pods in its namespace up to date.
pub struct ElasticQuotaReconciler {
    name: String,
    store: StateStore,
    calculator: ResourceCalculator,
    metrics: Arc<MetricsRegistry>,
}

impl ElasticQuotaReconciler {
    pub fn new(
        name: &str,
        store: StateStore,
        calculator: ResourceCalculator,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            store,
            calculator,
            metrics,
        }
    }
}

#[async_trait]
impl Reconciler for ElasticQuotaReconciler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()> {
        let Some(quota) = self
            .store
            .get_object::<ElasticQuota>(&key.namespace, &key.name)
            .await?
        else {
            debug!("ElasticQuota {} not found, nothing to do", key);
            return Ok(());
        };

        let pods = running_pods(&self.store, std::slice::from_ref(&quota.namespace)).await?;
        let plan = plan_capacity(pods, &quota.spec, &self.calculator);
        let patched = apply_capacity_labels(&self.store, &plan, &self.metrics).await?;

        let used = plan.used.restricted_to(&quota.spec.min);
        if used != quota.status.used {
            let mut updated = quota.clone();
            updated.status.used = used.clone();
            self.store.patch_object(&quota, &updated).await?;
            info!("ElasticQuota {} used={} ({} label patches)", key, used, patched);
        }
        Ok(())
    }

    async fn keys_for_event(&self, event: &WatchEvent) -> anyhow::Result<Vec<ObjectKey>> {
        match event.kind() {
            Some(KIND_ELASTIC_QUOTAS) => Ok(event
                .decode_value::<ElasticQuota>()
                .or_else(|| event.decode_prev::<ElasticQuota>())
                .map(|q| q.object_key())
                .into_iter()
                .collect()),
            Some(KIND_PODS) if pod_event_moves_usage(event) => {
                let Some(pod) = event_pod(event) else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .store
                    .list_objects::<ElasticQuota>(Some(&pod.namespace))
                    .await?
                    .iter()
                    .map(|q| q.object_key())
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn all_keys(&self) -> anyhow::Result<Vec<ObjectKey>> {
        Ok(self
            .store
            .list_objects::<ElasticQuota>(None)
            .await?
            .iter()
            .map(|q| q.object_key())
            .collect())
    }
}
