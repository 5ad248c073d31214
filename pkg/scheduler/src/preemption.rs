use std::collections::HashMap;

use tracing::{debug, error};

use pkg_constants::scheduler::{
    REASON_MAX_QUOTA_EXCEEDED, REASON_MISSING_CYCLE_STATE, REASON_PREEMPTION_POLICY_NEVER,
    REASON_TERMINATING_ON_NOMINATED_NODE, REASON_TOTAL_MIN_QUOTA_EXCEEDED,
};
use pkg_types::{Pod, PodDisruptionBudget, PreemptionPolicy};

use crate::framework::{
    ClusterSnapshot, Code, CycleState, Framework, NodeInfo, PodInfo, PreFilterState, Status,
};
use crate::overquota::guaranteed_overquota;
use crate::quota_info::{QuotaInfo, QuotaInfos};

/// A node on which preemption would let the pod fit, and what it costs.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub node_name: String,
    /// Pods to evict, most important first.
    pub victims: Vec<Pod>,
    pub num_pdb_violations: usize,
}

impl Candidate {
    fn highest_victim_priority(&self) -> i32 {
        self.victims
            .iter()
            .map(Pod::priority)
            .max()
            .unwrap_or(i32::MIN)
    }
}

/// Quota-aware preemption. Runs after PreFilter or Filter declared the pod
/// unschedulable, on a clone of the cycle state per node.
pub struct Evaluator<'a> {
    framework: &'a Framework,
}

impl<'a> Evaluator<'a> {
    pub fn new(framework: &'a Framework) -> Self {
        Self { framework }
    }

    /// Find the best node to preempt on. `statuses` holds the Filter (or
    /// PreFilter) outcome per node.
    pub fn preempt(
        &self,
        state: &CycleState,
        pod: &Pod,
        cluster: &ClusterSnapshot,
        statuses: &HashMap<String, Status>,
        pdbs: &[PodDisruptionBudget],
    ) -> Result<Candidate, Status> {
        let nominated_status = pod
            .nominated_node_name
            .as_deref()
            .and_then(|name| statuses.get(name));
        if let Err(reason) = self.pod_eligible_to_preempt_others(state, pod, cluster, nominated_status) {
            debug!("Pod {} cannot preempt: {}", pod.key(), reason);
            return Err(Status::unschedulable(reason));
        }

        let potential: Vec<&NodeInfo> = cluster
            .nodes
            .iter()
            .filter(|n| {
                statuses
                    .get(n.name())
                    .is_none_or(|s| s.code != Code::UnschedulableAndUnresolvable)
            })
            .collect();
        if potential.is_empty() {
            return Err(Status::unresolvable(format!(
                "0/{} nodes are available: preemption is not helpful for scheduling",
                cluster.nodes.len()
            )));
        }

        let (candidates, failures) = self.dry_run_preemption(state, pod, cluster, &potential, pdbs);
        match pick_one_candidate(candidates) {
            Some(candidate) => {
                debug!(
                    "Pod {} preempts {} pod(s) on {}",
                    pod.key(),
                    candidate.victims.len(),
                    candidate.node_name
                );
                Ok(candidate)
            }
            None => {
                let mut reasons: Vec<String> = failures
                    .iter()
                    .map(|(node, status)| format!("{}: {}", node, status.message()))
                    .collect();
                reasons.sort();
                Err(Status {
                    code: Code::Unschedulable,
                    reasons: if reasons.is_empty() {
                        vec![format!("0/{} nodes are available for preemption", cluster.nodes.len())]
                    } else {
                        reasons
                    },
                })
            }
        }
    }

    /// A pod that already preempted and is waiting for its victims to go
    /// away must not preempt again.
    pub fn pod_eligible_to_preempt_others(
        &self,
        state: &CycleState,
        pod: &Pod,
        cluster: &ClusterSnapshot,
        nominated_status: Option<&Status>,
    ) -> Result<(), String> {
        if pod.spec.preemption_policy == PreemptionPolicy::Never {
            return Err(REASON_PREEMPTION_POLICY_NEVER.to_string());
        }
        let Some(pre) = state.pre_filter.as_ref() else {
            error!("Failed to read prefilter state of {} from cycle state", pod.key());
            return Err(REASON_MISSING_CYCLE_STATE.to_string());
        };

        let Some(nominated) = pod.nominated_node_name.as_deref().filter(|n| !n.is_empty()) else {
            return Ok(());
        };
        if nominated_status.is_some_and(|s| s.code == Code::UnschedulableAndUnresolvable) {
            return Ok(());
        }
        let Some(snapshot) = state.quota_snapshot.as_ref() else {
            error!("Failed to read quota snapshot of {} from cycle state", pod.key());
            return Ok(());
        };
        let Some(node) = cluster.node_info(nominated) else {
            return Ok(());
        };

        let priority = pod.priority();
        let terminating = node.pods.iter().filter(|p| p.pod.is_terminating());
        match snapshot.lookup(&pod.namespace) {
            Some(quota) => {
                let over_min = quota.used_over_min_with(&pre.nominated_in_quota_with_req);
                for p in terminating {
                    let Some(victim_quota) = snapshot.lookup(&p.pod.namespace) else {
                        continue;
                    };
                    let same_namespace = p.pod.namespace == pod.namespace;
                    if (same_namespace && p.pod.priority() < priority)
                        || (!same_namespace && !over_min && victim_quota.used_over_min())
                    {
                        return Err(REASON_TERMINATING_ON_NOMINATED_NODE.to_string());
                    }
                }
            }
            None => {
                for p in terminating {
                    if snapshot.lookup(&p.pod.namespace).is_none() && p.pod.priority() < priority {
                        return Err(REASON_TERMINATING_ON_NOMINATED_NODE.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    /// Pick victims on one node, then give back as many as possible while the
    /// pod still fits. Returns the victims and how many of them violate a
    /// disruption budget. `state` and `node` are mutated; pass clones.
    pub fn select_victims_on_node(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        node: &mut NodeInfo,
        nominated: &[PodInfo],
        pdbs: &[PodDisruptionBudget],
    ) -> Result<(Vec<Pod>, usize), Status> {
        if state.quota_snapshot.is_none() {
            let msg = "Failed to read quota snapshot from cycle state";
            error!("{}", msg);
            return Err(Status::unschedulable(msg));
        }
        let Some(pre) = state.pre_filter.clone() else {
            let msg = "Failed to read prefilter state from cycle state";
            error!("{}", msg);
            return Err(Status::unschedulable(msg));
        };

        let priority = pod.priority();
        let mut pods = node.pods.clone();
        pods.sort_by(|a, b| a.pod.more_important_than(&b.pod));

        let preemptor_over_min = quota_for(state, &pod.namespace)
            .map(|q| q.used_over_min_with(&pre.nominated_in_quota_with_req));

        let mut potential = Vec::new();
        for candidate in pods {
            let eligible = match preemptor_over_min {
                Some(over_min) => {
                    let Some(snapshot) = state.quota_snapshot.as_ref() else {
                        continue;
                    };
                    let Some(victim_quota) = snapshot.lookup(&candidate.pod.namespace) else {
                        continue;
                    };
                    let same_namespace = candidate.pod.namespace == pod.namespace;
                    if over_min {
                        if same_namespace {
                            candidate.pod.priority() < priority
                        } else {
                            candidate.pod.is_over_quota()
                                && borrows_beyond_guarantee(snapshot, pod, &pre, victim_quota)
                        }
                    } else {
                        !same_namespace
                            && victim_quota.used_over_min()
                            && candidate.pod.is_over_quota()
                    }
                }
                None => {
                    quota_for(state, &candidate.pod.namespace).is_none()
                        && candidate.pod.priority() < priority
                }
            };
            if eligible {
                self.remove_pod(state, pod, node, &candidate)?;
                potential.push(candidate);
            }
        }

        if potential.is_empty() {
            return Err(Status::unresolvable(format!(
                "No victims found on node {} for preemptor pod {}",
                node.name(),
                pod.name
            )));
        }

        let status = self
            .framework
            .run_filter_plugins_with_nominated_pods(state, pod, node, nominated);
        if !status.is_success() {
            return Err(status);
        }

        if let Some(quota) = quota_for(state, &pod.namespace) {
            if quota.used_over_max_with(&pre.pod_req) {
                return Err(Status::unschedulable(REASON_MAX_QUOTA_EXCEEDED));
            }
            if let Some(snapshot) = state.quota_snapshot.as_ref() {
                if snapshot.aggregated_used_over_min_with(&pre.pod_req) {
                    return Err(Status::unschedulable(REASON_TOTAL_MIN_QUOTA_EXCEEDED));
                }
            }
        }

        potential.sort_by(|a, b| a.pod.more_important_than(&b.pod));
        let (violating, non_violating) = filter_pods_with_pdb_violation(potential, pdbs);

        let mut victims = Vec::new();
        let mut num_violating = 0;
        for info in violating {
            if !self.reprieve(state, pod, node, nominated, &pre, info, &mut victims)? {
                num_violating += 1;
            }
        }
        for info in non_violating {
            self.reprieve(state, pod, node, nominated, &pre, info, &mut victims)?;
        }
        Ok((victims, num_violating))
    }

    /// Put `info` back on the node. Keeps it there if the pod still fits and
    /// no quota bound is crossed, otherwise commits it as a victim. Returns
    /// whether it was reprieved.
    #[allow(clippy::too_many_arguments)]
    fn reprieve(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        node: &mut NodeInfo,
        nominated: &[PodInfo],
        pre: &PreFilterState,
        info: PodInfo,
        victims: &mut Vec<Pod>,
    ) -> Result<bool, Status> {
        self.add_pod(state, pod, node, &info)?;
        let fits = self
            .framework
            .run_filter_plugins_with_nominated_pods(state, pod, node, nominated)
            .is_success();
        let over_quota = match (state.quota_snapshot.as_ref(), quota_for(state, &pod.namespace)) {
            (Some(snapshot), Some(quota)) => {
                quota.used_over_max_with(&pre.nominated_in_quota_with_req)
                    || snapshot.aggregated_used_over_min_with(&pre.nominated_total_with_req)
            }
            _ => false,
        };
        if fits && !over_quota {
            return Ok(true);
        }
        self.remove_pod(state, pod, node, &info)?;
        debug!("Found preemption victim {} on node {}", info.pod.key(), node.name());
        victims.push(info.pod);
        Ok(false)
    }

    fn remove_pod(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        node: &mut NodeInfo,
        info: &PodInfo,
    ) -> Result<(), Status> {
        node.remove_pod(&info.pod.key())
            .map_err(|e| Status::error(e.to_string()))?;
        let status = self
            .framework
            .run_pre_filter_extension_remove_pod(state, pod, info);
        if !status.is_success() {
            return Err(status);
        }
        Ok(())
    }

    fn add_pod(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        node: &mut NodeInfo,
        info: &PodInfo,
    ) -> Result<(), Status> {
        node.add_pod(info.clone());
        let status = self
            .framework
            .run_pre_filter_extension_add_pod(state, pod, info);
        if !status.is_success() {
            return Err(status);
        }
        Ok(())
    }

    /// Run victim selection on every potential node in parallel, each on its
    /// own copy of the cycle state and node.
    fn dry_run_preemption(
        &self,
        state: &CycleState,
        pod: &Pod,
        cluster: &ClusterSnapshot,
        nodes: &[&NodeInfo],
        pdbs: &[PodDisruptionBudget],
    ) -> (Vec<Candidate>, HashMap<String, Status>) {
        let results: Vec<(String, Result<(Vec<Pod>, usize), Status>)> = std::thread::scope(|s| {
            let handles: Vec<_> = nodes
                .iter()
                .map(|node| {
                    let name = node.name().to_string();
                    let handle = s.spawn(move || {
                        let mut state = state.clone();
                        let mut node_copy: NodeInfo = (*node).clone();
                        self.select_victims_on_node(
                            &mut state,
                            pod,
                            &mut node_copy,
                            cluster.nominated_pods_for_node(node.name()),
                            pdbs,
                        )
                    });
                    (name, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        error!("Preemption dry-run on node {} panicked", name);
                        Err(Status::error("preemption dry-run panicked"))
                    });
                    (name, result)
                })
                .collect()
        });

        let mut candidates = Vec::new();
        let mut failures = HashMap::new();
        for (node_name, result) in results {
            match result {
                Ok((victims, num_pdb_violations)) if !victims.is_empty() => {
                    candidates.push(Candidate {
                        node_name,
                        victims,
                        num_pdb_violations,
                    });
                }
                Ok(_) => {
                    failures.insert(node_name, Status::unresolvable("no victims needed"));
                }
                Err(status) => {
                    failures.insert(node_name, status);
                }
            }
        }
        (candidates, failures)
    }
}

fn quota_for<'s>(state: &'s CycleState, namespace: &str) -> Option<&'s QuotaInfo> {
    state.quota_snapshot.as_ref()?.lookup(namespace)
}

/// The preemptor's quota still has guaranteed headroom while the victim's
/// quota uses more than its own guarantee.
fn borrows_beyond_guarantee(
    snapshot: &QuotaInfos,
    pod: &Pod,
    pre: &PreFilterState,
    victim_quota: &QuotaInfo,
) -> bool {
    let Some(preemptor_quota) = snapshot.lookup(&pod.namespace) else {
        return false;
    };
    let preemptor_guarantee = preemptor_quota
        .min
        .sum(&guaranteed_overquota(snapshot, preemptor_quota));
    if !preemptor_quota.used_lte_with(&preemptor_guarantee, &pre.nominated_in_quota_with_req) {
        return false;
    }
    let victim_guarantee = victim_quota
        .min
        .sum(&guaranteed_overquota(snapshot, victim_quota));
    victim_quota.used_over(&victim_guarantee)
}

/// Split pods into those whose eviction would violate a disruption budget and
/// those whose would not. Order is preserved within each group.
pub fn filter_pods_with_pdb_violation(
    pods: Vec<PodInfo>,
    pdbs: &[PodDisruptionBudget],
) -> (Vec<PodInfo>, Vec<PodInfo>) {
    let mut allowed: Vec<i32> = pdbs.iter().map(|p| p.status.disruptions_allowed).collect();
    let mut violating = Vec::new();
    let mut non_violating = Vec::new();

    for info in pods {
        let mut violated = false;
        if !info.pod.labels.is_empty() {
            for (i, pdb) in pdbs.iter().enumerate() {
                if !pdb.matches(&info.pod) {
                    continue;
                }
                if pdb.status.disrupted_pods.contains(&info.pod.name) {
                    continue;
                }
                allowed[i] -= 1;
                if allowed[i] < 0 {
                    violated = true;
                }
            }
        }
        if violated {
            violating.push(info);
        } else {
            non_violating.push(info);
        }
    }
    (violating, non_violating)
}

/// Fewest budget violations, then fewest victims, then the lowest
/// highest-victim priority. Node name breaks the remaining ties.
pub fn pick_one_candidate(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().min_by(|a, b| {
        a.num_pdb_violations
            .cmp(&b.num_pdb_violations)
            .then_with(|| a.victims.len().cmp(&b.victims.len()))
            .then_with(|| a.highest_victim_priority().cmp(&b.highest_victim_priority()))
            .then_with(|| a.node_name.cmp(&b.node_name))
    })
}
