use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use pkg_constants::state::{KIND_COMPOSITE_ELASTIC_QUOTAS, KIND_PODS};
use pkg_gpu::ResourceCalculator;
use pkg_metrics::MetricsRegistry;
use pkg_state::{StateStore, WatchEvent};
use pkg_types::object::Object;
use pkg_types::{CompositeElasticQuota, ElasticQuota, ObjectKey};

use crate::capacity::{apply_capacity_labels, plan_capacity, running_pods};
use crate::predicate::{event_pod, pod_event_moves_usage};
use crate::runner::Reconciler;

/// Reconciles CompositeElasticQuotas. Simple quotas in any of the composite's
/// namespaces are deleted first; the composite governs them from then on.
pub struct CompositeElasticQuotaReconciler {
    name: String,
    store: StateStore,
    calculator: ResourceCalculator,
    metrics: Arc<MetricsRegistry>,
}

impl CompositeElasticQuotaReconciler {
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

    async fn delete_overlapping_quotas(&self, composite: &CompositeElasticQuota) -> anyhow::Result<()> {
        for ns in &composite.spec.namespaces {
            for quota in self.store.list_objects::<ElasticQuota>(Some(ns)).await? {
                if self
                    .store
                    .delete_object::<ElasticQuota>(&quota.namespace, &quota.name)
                    .await?
                {
                    info!(
                        "Deleted ElasticQuota {} superseded by CompositeElasticQuota {}",
                        quota.object_key(),
                        composite.object_key()
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for CompositeElasticQuotaReconciler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()> {
        let Some(composite) = self
            .store
            .get_object::<CompositeElasticQuota>(&key.namespace, &key.name)
            .await?
        else {
            debug!("CompositeElasticQuota {} not found, nothing to do", key);
            return Ok(());
        };

        self.delete_overlapping_quotas(&composite).await?;

        let limits = composite.spec.limits();
        let pods = running_pods(&self.store, &composite.spec.namespaces).await?;
        let plan = plan_capacity(pods, &limits, &self.calculator);
        let patched = apply_capacity_labels(&self.store, &plan, &self.metrics).await?;

        let used = plan.used.restricted_to(&limits.min);
        if used != composite.status.used {
            let mut updated = composite.clone();
            updated.status.used = used.clone();
            self.store.patch_object(&composite, &updated).await?;
            info!(
                "CompositeElasticQuota {} used={} ({} label patches)",
                key, used, patched
            );
        }
        Ok(())
    }

    async fn keys_for_event(&self, event: &WatchEvent) -> anyhow::Result<Vec<ObjectKey>> {
        match event.kind() {
            Some(KIND_COMPOSITE_ELASTIC_QUOTAS) => Ok(event
                .decode_value::<CompositeElasticQuota>()
                .or_else(|| event.decode_prev::<CompositeElasticQuota>())
                .map(|q| q.object_key())
                .into_iter()
                .collect()),
            Some(KIND_PODS) if pod_event_moves_usage(event) => {
                let Some(pod) = event_pod(event) else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .store
                    .list_objects::<CompositeElasticQuota>(None)
                    .await?
                    .iter()
                    .filter(|q| q.spec.namespaces.contains(&pod.namespace))
                    .map(|q| q.object_key())
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn all_keys(&self) -> anyhow::Result<Vec<ObjectKey>> {
        Ok(self
            .store
            .list_objects::<CompositeElasticQuota>(None)
            .await?
            .iter()
            .map(|q| q.object_key())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::{ResourceName, ResourceVector};

    fn cpu(v: i64) -> ResourceVector {
        ResourceVector::new().with(ResourceName::Cpu, v)
    }

    #[tokio::test]
    async fn composite_events_map_to_composites_covering_the_namespace() {
        let store = StateStore::in_memory();
        let reconciler = CompositeElasticQuotaReconciler::new(
            "compositeelasticquota-controller",
            store.clone(),
            ResourceCalculator::new(32),
            Arc::new(MetricsRegistry::elastiq()),
        );
        let covering = CompositeElasticQuota::new("admin", "shared", &["a", "b"], cpu(100), None);
        let other = CompositeElasticQuota::new("admin", "other", &["c"], cpu(100), None);
        store.put_object(&covering).await.unwrap();
        store.put_object(&other).await.unwrap();

        let mut rx = store.event_log.subscribe();
        store.delete_object::<CompositeElasticQuota>("admin", "other").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            reconciler.keys_for_event(&event).await.unwrap(),
            vec![other.object_key()]
        );

        let mut all = reconciler.all_keys().await.unwrap();
        all.sort();
        assert_eq!(all, vec![covering.object_key()]);
    }
}
