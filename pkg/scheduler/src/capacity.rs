use parking_lot::RwLock;
use tracing::{debug, error, info};

use pkg_constants::scheduler::{
    CAPACITY_SCHEDULING_PLUGIN, REASON_MAX_QUOTA_EXCEEDED, REASON_TOTAL_MIN_QUOTA_EXCEEDED,
};
use pkg_gpu::ResourceCalculator;
use pkg_types::{Pod, PodPhase, ResourceVector};

use crate::framework::{
    ClusterSnapshot, CycleState, PodInfo, PreFilterExtensions, PreFilterState, Status,
};
use crate::quota_info::{QuotaInfo, QuotaInfos};

/// Elastic-quota admission inside the scheduling cycle.
///
/// Owns the live quota registry. Event handlers and Reserve/Unreserve write
/// to it under the lock; PreFilter and preemption work on a snapshot kept in
/// the cycle state.
pub struct CapacityScheduling {
    quotas: RwLock<QuotaInfos>,
    calculator: ResourceCalculator,
}

impl CapacityScheduling {
    pub fn new(calculator: ResourceCalculator) -> Self {
        info!(
            "{} plugin using gpu_device_memory_gb={}",
            CAPACITY_SCHEDULING_PLUGIN, calculator.gpu_device_memory_gb
        );
        Self {
            quotas: RwLock::new(QuotaInfos::new()),
            calculator,
        }
    }

    pub fn name(&self) -> &str {
        CAPACITY_SCHEDULING_PLUGIN
    }

    pub fn calculator(&self) -> &ResourceCalculator {
        &self.calculator
    }

    /// Deep copy of the registry for cycle-local use.
    pub fn snapshot(&self) -> QuotaInfos {
        self.quotas.read().clone()
    }

    pub fn quota_count(&self) -> usize {
        self.quotas.read().len()
    }

    /// Live `used` of the quota governing `namespace`.
    pub fn used_for(&self, namespace: &str) -> Option<ResourceVector> {
        self.quotas.read().lookup(namespace).map(|q| q.used.clone())
    }

    // --- PreFilter ---

    /// Reject the pod if its quota would go over `max`, or if cluster-wide
    /// usage would go over the sum of all minimums. Nominated pods that will
    /// land first are counted as already used.
    pub fn pre_filter(&self, state: &mut CycleState, pod: &Pod, cluster: &ClusterSnapshot) -> Status {
        let snapshot = self.snapshot();
        let pod_req = self.calculator.compute_pod_request(pod);

        let Some(quota) = snapshot.lookup(&pod.namespace) else {
            debug!("Namespace {} is not subject to any quota", pod.namespace);
            state.pre_filter = Some(PreFilterState {
                pod_req,
                ..Default::default()
            });
            state.quota_snapshot = Some(snapshot);
            return Status::success();
        };
        let quota_key = quota.key();

        let mut in_quota = ResourceVector::new();
        let mut total = ResourceVector::new();
        let pod_key = pod.key();
        for nominated in cluster.all_nominated() {
            if nominated.pod.key() == pod_key {
                continue;
            }
            let Some(info) = snapshot.lookup(&nominated.pod.namespace) else {
                continue;
            };
            if info.key() == quota_key {
                if nominated.pod.priority() >= pod.priority() {
                    in_quota += &nominated.request;
                    total += &nominated.request;
                }
            } else if !info.used_over_min() {
                total += &nominated.request;
            }
        }
        in_quota += &pod_req;
        total += &pod_req;

        let over_max = quota.used_over_max_with(&in_quota);
        let over_total_min = snapshot.aggregated_used_over_min_with(&total);
        let quota_name = quota_key.to_string();

        state.pre_filter = Some(PreFilterState {
            pod_req,
            nominated_in_quota_with_req: in_quota,
            nominated_total_with_req: total,
        });
        state.quota_snapshot = Some(snapshot);

        if over_max {
            debug!(
                "Pod {} rejected in PreFilter: quota {} is more than max",
                pod_key, quota_name
            );
            return Status::unschedulable(REASON_MAX_QUOTA_EXCEEDED);
        }
        if over_total_min {
            debug!(
                "Pod {} rejected in PreFilter: total quota used is more than min",
                pod_key
            );
            return Status::unschedulable(REASON_TOTAL_MIN_QUOTA_EXCEEDED);
        }
        Status::success()
    }

    // --- Reserve ---

    pub fn reserve(&self, pod: &Pod, node_name: &str) -> Status {
        let request = self.calculator.compute_pod_request(pod);
        let mut quotas = self.quotas.write();
        if let Some(quota) = quotas.lookup_mut(&pod.namespace) {
            quota.add_pod_if_not_present(&pod.key(), &request);
            debug!("Reserved {} on {} against quota {}", pod.key(), node_name, quota.key());
        }
        Status::success()
    }

    pub fn unreserve(&self, pod: &Pod, node_name: &str) {
        let request = self.calculator.compute_pod_request(pod);
        let mut quotas = self.quotas.write();
        if let Some(quota) = quotas.lookup_mut(&pod.namespace) {
            quota.delete_pod_if_present(&pod.key(), &request);
            debug!("Unreserved {} on {} from quota {}", pod.key(), node_name, quota.key());
        }
    }

    // --- Quota events ---

    pub fn add_quota(&self, info: QuotaInfo) {
        info!(
            "Add quota {} (namespaces={:?})",
            info.key(),
            info.namespaces
        );
        self.quotas.write().add(info);
    }

    pub fn update_quota(&self, old: &QuotaInfo, new: QuotaInfo) {
        info!(
            "Update quota {} (namespaces={:?})",
            new.key(),
            new.namespaces
        );
        self.quotas.write().update(old, new);
    }

    pub fn delete_quota(&self, info: &QuotaInfo) {
        info!("Delete quota {}", info.key());
        self.quotas.write().delete(info);
    }

    /// Rebuild the registry from a full listing. Records missing from
    /// `infos` are dropped and pod usage starts from zero; `resync_pods`
    /// restores it. Simple quotas must come before composites.
    pub fn replace_quotas(&self, infos: impl IntoIterator<Item = QuotaInfo>) {
        let mut rebuilt = QuotaInfos::new();
        for info in infos {
            rebuilt.add(info);
        }
        let mut quotas = self.quotas.write();
        info!(
            "Rebuilt quota registry ({} -> {} quotas)",
            quotas.len(),
            rebuilt.len()
        );
        *quotas = rebuilt;
    }

    // --- Pod events (assigned pods only) ---

    pub fn add_pod(&self, pod: &Pod) {
        if !pod.is_assigned() || pod.phase.is_terminal() {
            return;
        }
        let request = self.calculator.compute_pod_request(pod);
        let mut quotas = self.quotas.write();
        if let Some(quota) = quotas.lookup_mut(&pod.namespace) {
            quota.add_pod_if_not_present(&pod.key(), &request);
        }
    }

    pub fn update_pod(&self, old: &Pod, new: &Pod) {
        match (old.is_assigned(), new.is_assigned()) {
            (false, false) => return,
            (false, true) => return self.add_pod(new),
            (true, false) => return self.delete_pod(old),
            (true, true) => {}
        }
        if old.phase.is_terminal() {
            return;
        }
        if new.phase != PodPhase::Running && new.phase != PodPhase::Pending {
            self.delete_pod(new);
        }
    }

    pub fn delete_pod(&self, pod: &Pod) {
        let request = self.calculator.compute_pod_request(pod);
        let mut quotas = self.quotas.write();
        if let Some(quota) = quotas.lookup_mut(&pod.namespace) {
            quota.delete_pod_if_present(&pod.key(), &request);
        }
    }

    /// Account every assigned, live pod not yet counted. Safe to call with
    /// the full pod list on every pass.
    pub fn resync_pods(&self, pods: &[Pod]) {
        for pod in pods {
            self.add_pod(pod);
        }
    }
}

fn missing_snapshot() -> Status {
    let msg = "Failed to read quota snapshot from cycle state";
    error!("{}", msg);
    Status::error(msg)
}

impl PreFilterExtensions for CapacityScheduling {
    fn add_pod(&self, state: &mut CycleState, _pod_to_schedule: &Pod, pod_to_add: &PodInfo) -> Status {
        let Some(snapshot) = state.quota_snapshot.as_mut() else {
            return missing_snapshot();
        };
        if let Some(quota) = snapshot.lookup_mut(&pod_to_add.pod.namespace) {
            quota.add_pod_if_not_present(&pod_to_add.pod.key(), &pod_to_add.request);
        }
        Status::success()
    }

    fn remove_pod(&self, state: &mut CycleState, _pod_to_schedule: &Pod, pod_to_remove: &PodInfo) -> Status {
        let Some(snapshot) = state.quota_snapshot.as_mut() else {
            return missing_snapshot();
        };
        if let Some(quota) = snapshot.lookup_mut(&pod_to_remove.pod.namespace) {
            quota.delete_pod_if_present(&pod_to_remove.pod.key(), &pod_to_remove.request);
        }
        Status::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::Code;
    use crate::quota_info::QuotaKind;
    use pkg_types::{ContainerSpec, Node, PodSpec, ResourceName};
    use std::collections::BTreeSet;

    fn cpu(v: i64) -> ResourceVector {
        ResourceVector::new().with(ResourceName::Cpu, v)
    }

    fn quota(ns: &str, min: i64, max: Option<i64>) -> QuotaInfo {
        QuotaInfo::new(
            ns,
            "quota",
            QuotaKind::Simple,
            BTreeSet::from([ns.to_string()]),
            cpu(min),
            max.map(cpu),
        )
    }

    fn pod(ns: &str, name: &str, cpu_req: i64, priority: i32) -> Pod {
        Pod::new(
            ns,
            name,
            PodSpec {
                containers: vec![ContainerSpec::new("c", cpu(cpu_req))],
                priority,
                ..Default::default()
            },
        )
    }

    fn running_on(mut p: Pod, node: &str) -> Pod {
        p.node_name = Some(node.to_string());
        p.phase = PodPhase::Running;
        p
    }

    fn plugin() -> CapacityScheduling {
        CapacityScheduling::new(ResourceCalculator::new(32))
    }

    fn empty_cluster() -> ClusterSnapshot {
        ClusterSnapshot::build(vec![Node::new("n1", cpu(10_000))], &[], &ResourceCalculator::new(32))
    }

    #[test]
    fn namespace_without_quota_passes() {
        let cs = plugin();
        let mut state = CycleState::default();
        let status = cs.pre_filter(&mut state, &pod("free", "p", 1_000_000, 0), &empty_cluster());
        assert!(status.is_success());
        assert!(state.quota_snapshot.is_some());
        assert_eq!(state.pre_filter.unwrap().pod_req.milli_cpu(), 1_000_000);
    }

    #[test]
    fn max_quota_exceeded() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, Some(200)));
        cs.add_quota(quota("b", 1000, None));
        cs.add_pod(&running_on(pod("a", "existing", 150, 0), "n1"));

        let mut state = CycleState::default();
        let status = cs.pre_filter(&mut state, &pod("a", "p", 60, 0), &empty_cluster());
        assert_eq!(status.code, Code::Unschedulable);
        assert_eq!(status.message(), REASON_MAX_QUOTA_EXCEEDED);

        let status = cs.pre_filter(&mut CycleState::default(), &pod("a", "p", 50, 0), &empty_cluster());
        assert!(status.is_success());
    }

    #[test]
    fn total_min_quota_exceeded() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, None));
        cs.add_quota(quota("b", 100, None));
        cs.add_pod(&running_on(pod("b", "borrower", 180, 0), "n1"));

        let status = cs.pre_filter(&mut CycleState::default(), &pod("a", "p", 30, 0), &empty_cluster());
        assert_eq!(status.message(), REASON_TOTAL_MIN_QUOTA_EXCEEDED);
        let status = cs.pre_filter(&mut CycleState::default(), &pod("a", "p", 20, 0), &empty_cluster());
        assert!(status.is_success());
    }

    #[test]
    fn nominated_pods_are_counted() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, Some(100)));
        cs.add_quota(quota("b", 100, None));

        let mut same_quota_high = pod("a", "nominated-high", 40, 10);
        same_quota_high.nominated_node_name = Some("n1".into());
        let mut same_quota_low = pod("a", "nominated-low", 40, 0);
        same_quota_low.nominated_node_name = Some("n1".into());
        let mut other_quota = pod("b", "nominated-other", 70, 0);
        other_quota.nominated_node_name = Some("n1".into());

        let cluster = ClusterSnapshot::build(
            vec![Node::new("n1", cpu(10_000))],
            &[same_quota_high, same_quota_low, other_quota],
            &ResourceCalculator::new(32),
        );
        let mut state = CycleState::default();
        let status = cs.pre_filter(&mut state, &pod("a", "p", 50, 5), &cluster);
        assert!(status.is_success());
        let pf = state.pre_filter.unwrap();
        assert_eq!(pf.nominated_in_quota_with_req.milli_cpu(), 90);
        assert_eq!(pf.nominated_total_with_req.milli_cpu(), 160);

        let status = cs.pre_filter(&mut CycleState::default(), &pod("a", "p", 61, 5), &cluster);
        assert_eq!(status.message(), REASON_MAX_QUOTA_EXCEEDED);
    }

    #[test]
    fn replace_quotas_drops_unlisted_records() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, None));
        cs.add_quota(quota("b", 100, None));
        cs.add_pod(&running_on(pod("a", "p", 30, 0), "n1"));

        cs.replace_quotas(vec![quota("a", 200, None)]);
        assert_eq!(cs.quota_count(), 1);
        assert!(cs.used_for("b").is_none());
        assert_eq!(cs.snapshot().lookup("a").unwrap().min.milli_cpu(), 200);

        // usage comes back with the next pod resync
        assert!(cs.used_for("a").unwrap().is_zero());
        cs.resync_pods(&[running_on(pod("a", "p", 30, 0), "n1")]);
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 30);
    }

    #[test]
    fn reserve_then_unreserve_is_identity() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, None));
        let before = cs.used_for("a").unwrap();
        let p = pod("a", "p", 30, 0);
        assert!(cs.reserve(&p, "n1").is_success());
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 30);
        cs.unreserve(&p, "n1");
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), before.milli_cpu());
    }

    #[test]
    fn pod_updates_follow_assignment_and_phase() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, None));
        let pending = pod("a", "p", 30, 0);
        let mut bound = pending.clone();
        bound.node_name = Some("n1".into());

        cs.update_pod(&pending, &bound);
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 30);

        let mut running = bound.clone();
        running.phase = PodPhase::Running;
        cs.update_pod(&bound, &running);
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 30);

        let mut done = running.clone();
        done.phase = PodPhase::Succeeded;
        cs.update_pod(&running, &done);
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 0);

        // terminal old phase: nothing to do even if it looks running again
        cs.update_pod(&done, &running);
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 0);
    }

    #[test]
    fn dry_run_extensions_touch_only_the_snapshot() {
        let cs = plugin();
        cs.add_quota(quota("a", 100, None));
        let mut state = CycleState::default();
        let p = pod("a", "p", 10, 0);
        cs.pre_filter(&mut state, &p, &empty_cluster());

        let victim = PodInfo::new(running_on(pod("a", "v", 40, 0), "n1"), cs.calculator());
        assert!(PreFilterExtensions::add_pod(&cs, &mut state, &p, &victim).is_success());
        let snap_used = state.quota_snapshot.as_ref().unwrap().lookup("a").unwrap().used.milli_cpu();
        assert_eq!(snap_used, 40);
        assert_eq!(cs.used_for("a").unwrap().milli_cpu(), 0);

        assert!(PreFilterExtensions::remove_pod(&cs, &mut state, &p, &victim).is_success());
        let snap_used = state.quota_snapshot.as_ref().unwrap().lookup("a").unwrap().used.milli_cpu();
        assert_eq!(snap_used, 0);
    }

    #[test]
    fn extensions_without_pre_filter_error() {
        let cs = plugin();
        let p = pod("a", "p", 10, 0);
        let info = PodInfo::new(p.clone(), cs.calculator());
        let status = PreFilterExtensions::add_pod(&cs, &mut CycleState::default(), &p, &info);
        assert_eq!(status.code, Code::Error);
    }
}
