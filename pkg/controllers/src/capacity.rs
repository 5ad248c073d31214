//! Capacity-info labelling: walk a quota's running pods oldest first and mark
//! each one `in-quota` while the running total stays within `min`.

use std::cmp::Ordering;

use tracing::debug;

use pkg_constants::labels::LABEL_CAPACITY_INFO;
use pkg_gpu::ResourceCalculator;
use pkg_metrics::{CAPACITY_LABEL_PATCHES, MetricsRegistry};
use pkg_state::StateStore;
use pkg_types::{CapacityInfo, Pod, QuotaLimits, ResourceVector};

/// Desired label per pod, in sort order, plus the total of their requests.
#[derive(Debug, Clone)]
pub struct CapacityPlan {
    pub assignments: Vec<(Pod, CapacityInfo)>,
    pub used: ResourceVector,
}

/// Older first, then lower priority, then smaller request. Name and namespace
/// make the order total.
///
/// Requests are compared with [`ResourceVector::magnitude_cmp`]. When neither
/// request is componentwise smaller (more CPU but less memory, say), the pair
/// is ordered by the first resource name, in sorted order, where they differ.
/// CPU is compared before memory, so the pod asking for less CPU goes first
/// regardless of memory.
pub fn capacity_order(a: &Pod, a_req: &ResourceVector, b: &Pod, b_req: &ResourceVector) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.priority().cmp(&b.priority()))
        .then_with(|| a_req.magnitude_cmp(b_req))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.namespace.cmp(&b.namespace))
}

pub fn plan_capacity(pods: Vec<Pod>, limits: &QuotaLimits, calculator: &ResourceCalculator) -> CapacityPlan {
    let mut entries: Vec<(Pod, ResourceVector)> = pods
        .into_iter()
        .map(|p| {
            let request = calculator.compute_pod_request(&p);
            (p, request)
        })
        .collect();
    entries.sort_by(|(a, ra), (b, rb)| capacity_order(a, ra, b, rb));

    let mut used = ResourceVector::zeros(
        limits
            .min
            .names()
            .chain(limits.max.iter().flat_map(|m| m.names())),
    );
    let assignments = entries
        .into_iter()
        .map(|(pod, request)| {
            used += &request;
            let desired = if used.fits_within(&limits.min) {
                CapacityInfo::InQuota
            } else {
                CapacityInfo::OverQuota
            };
            (pod, desired)
        })
        .collect();

    CapacityPlan { assignments, used }
}

/// Patch every pod whose label differs from the plan, in plan order.
/// Returns how many pods were patched. The first failure aborts.
pub async fn apply_capacity_labels(
    store: &StateStore,
    plan: &CapacityPlan,
    metrics: &MetricsRegistry,
) -> anyhow::Result<usize> {
    let mut patched = 0;
    for (pod, desired) in &plan.assignments {
        if pod.capacity_info() == Some(*desired) {
            continue;
        }
        let mut modified = pod.clone();
        modified
            .labels
            .insert(LABEL_CAPACITY_INFO.to_string(), desired.as_str().to_string());
        if store.patch_object(pod, &modified).await?.is_some() {
            debug!("Pod {} labelled {}", pod.key(), desired.as_str());
            metrics.counter_inc(CAPACITY_LABEL_PATCHES);
            patched += 1;
        }
    }
    Ok(patched)
}

/// Running pods across `namespaces`.
pub async fn running_pods(store: &StateStore, namespaces: &[String]) -> anyhow::Result<Vec<Pod>> {
    let mut pods = Vec::new();
    for ns in namespaces {
        pods.extend(
            store
                .list_objects::<Pod>(Some(ns))
                .await?
                .into_iter()
                .filter(|p| p.phase == pkg_types::PodPhase::Running),
        );
    }
    Ok(pods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pkg_constants::labels::CAPACITY_IN_QUOTA;
    use pkg_constants::resources::{RESOURCE_GPU_MEMORY, RESOURCE_NVIDIA_GPU};
    use pkg_types::{ContainerSpec, PodPhase, PodSpec, ResourceName};

    fn gpu_pod(name: &str, gpus: i64, age_secs: i64, priority: i32) -> Pod {
        let mut p = Pod::new(
            "team",
            name,
            PodSpec {
                containers: vec![ContainerSpec::new(
                    "main",
                    ResourceVector::new().with(RESOURCE_NVIDIA_GPU, gpus),
                )],
                priority,
                ..Default::default()
            },
        );
        p.created_at = Utc::now() - Duration::seconds(age_secs);
        p.phase = PodPhase::Running;
        p
    }

    fn limits(gpu_memory: i64) -> QuotaLimits {
        QuotaLimits {
            min: ResourceVector::new().with(RESOURCE_GPU_MEMORY, gpu_memory),
            max: None,
        }
    }

    fn labels(plan: &CapacityPlan) -> Vec<(String, CapacityInfo)> {
        plan.assignments
            .iter()
            .map(|(p, c)| (p.name.clone(), *c))
            .collect()
    }

    #[test]
    fn older_pods_keep_in_quota() {
        let calc = ResourceCalculator::new(8);
        let pods = vec![gpu_pod("w2", 2, 10, 0), gpu_pod("w1", 2, 100, 0)];

        let plan = plan_capacity(pods.clone(), &limits(32), &calc);
        assert_eq!(
            labels(&plan),
            vec![
                ("w1".to_string(), CapacityInfo::InQuota),
                ("w2".to_string(), CapacityInfo::InQuota)
            ]
        );
        assert_eq!(plan.used.scalar(RESOURCE_GPU_MEMORY), 32);

        let plan = plan_capacity(pods, &limits(16), &calc);
        assert_eq!(
            labels(&plan),
            vec![
                ("w1".to_string(), CapacityInfo::InQuota),
                ("w2".to_string(), CapacityInfo::OverQuota)
            ]
        );
    }

    #[test]
    fn ties_fall_through_to_priority_request_and_name() {
        let calc = ResourceCalculator::new(8);
        let now = Utc::now();
        let mut pods = vec![
            gpu_pod("c", 1, 0, 5),
            gpu_pod("b", 2, 0, 0),
            gpu_pod("a", 2, 0, 0),
            gpu_pod("d", 1, 0, 0),
        ];
        for p in &mut pods {
            p.created_at = now;
        }
        let plan = plan_capacity(pods, &limits(1000), &calc);
        let order: Vec<String> = plan.assignments.iter().map(|(p, _)| p.name.clone()).collect();
        assert_eq!(order, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn incomparable_requests_order_by_first_differing_resource() {
        let now = Utc::now();
        let at = |name: &str| {
            let mut p = gpu_pod(name, 0, 0, 0);
            p.created_at = now;
            p
        };
        let (a, b) = (at("a"), at("b"));
        let less_cpu = ResourceVector::new()
            .with(ResourceName::Cpu, 1000)
            .with(ResourceName::Memory, 1 << 30);
        let more_cpu = ResourceVector::new()
            .with(ResourceName::Cpu, 2000)
            .with(ResourceName::Memory, 1);
        assert_eq!(capacity_order(&b, &less_cpu, &a, &more_cpu), Ordering::Less);
        assert_eq!(capacity_order(&a, &more_cpu, &b, &less_cpu), Ordering::Greater);
    }

    #[test]
    fn used_declares_min_and_max_names() {
        let calc = ResourceCalculator::new(8);
        let limits = QuotaLimits {
            min: ResourceVector::new().with(ResourceName::Cpu, 1000),
            max: Some(ResourceVector::new().with(RESOURCE_GPU_MEMORY, 64)),
        };
        let plan = plan_capacity(Vec::new(), &limits, &calc);
        assert!(plan.used.contains(&ResourceName::Cpu));
        assert!(plan.used.contains(&ResourceName::scalar(RESOURCE_GPU_MEMORY)));
        assert!(plan.used.is_zero());
    }

    #[tokio::test]
    async fn labels_are_patched_once() {
        let store = StateStore::in_memory();
        let metrics = MetricsRegistry::elastiq();
        let calc = ResourceCalculator::new(8);
        let pod = gpu_pod("w1", 1, 0, 0);
        store.put_object(&pod).await.unwrap();

        let pods = running_pods(&store, &["team".to_string()]).await.unwrap();
        let plan = plan_capacity(pods, &limits(8), &calc);
        assert_eq!(apply_capacity_labels(&store, &plan, &metrics).await.unwrap(), 1);

        let pods = running_pods(&store, &["team".to_string()]).await.unwrap();
        assert_eq!(
            pods[0].labels.get(LABEL_CAPACITY_INFO).map(String::as_str),
            Some(CAPACITY_IN_QUOTA)
        );
        let plan = plan_capacity(pods, &limits(8), &calc);
        assert_eq!(apply_capacity_labels(&store, &plan, &metrics).await.unwrap(), 0);
        assert_eq!(metrics.counter_value(CAPACITY_LABEL_PATCHES), Some(1));
    }
}
