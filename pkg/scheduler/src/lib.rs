pub mod capacity;
pub mod framework;
pub mod node_fit;
pub mod overquota;
pub mod preemption;
pub mod quota_info;

pub use capacity::CapacityScheduling;
pub use framework::{ClusterSnapshot, Code, CycleState, Framework, NodeInfo, PodInfo, Status};
pub use preemption::{Candidate, Evaluator};
pub use quota_info::{QuotaInfo, QuotaInfos, QuotaKind};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pkg_gpu::ResourceCalculator;
use pkg_types::{Pod, PodDisruptionBudget};
use tracing::{debug, info};

use crate::node_fit::NodeResourcesFit;

/// Outcome of one scheduling cycle for a pending pod.
#[derive(Debug, Clone)]
pub enum ScheduleResult {
    /// Reserved against the quota; the caller binds the pod to `node`.
    Scheduled { node: String },
    /// The pod fits on `node` once `victims` are gone. Nothing is reserved.
    Preempting { node: String, victims: Vec<Pod> },
    Unschedulable {
        status: Status,
        rejected_in_pre_filter: bool,
        /// Why preemption did not help, if it was tried.
        preemption_status: Option<Status>,
    },
}

/// Runs PreFilter, Filter, PostFilter (preemption) and Reserve for one pod
/// at a time. Feasible nodes are picked round-robin.
pub struct Scheduler {
    framework: Framework,
    capacity: Arc<CapacityScheduling>,
    round_robin_index: AtomicUsize,
}

impl Scheduler {
    pub fn new(calculator: ResourceCalculator) -> Self {
        let capacity = Arc::new(CapacityScheduling::new(calculator));
        let framework = Framework::new()
            .with_filter(Arc::new(NodeResourcesFit::new(calculator)))
            .with_extensions(capacity.clone());
        Self {
            framework,
            capacity,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> &Arc<CapacityScheduling> {
        &self.capacity
    }

    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    pub fn schedule_one(
        &self,
        pod: &Pod,
        cluster: &ClusterSnapshot,
        pdbs: &[PodDisruptionBudget],
    ) -> ScheduleResult {
        let mut state = CycleState::default();

        let pre_filter = self.capacity.pre_filter(&mut state, pod, cluster);
        if !pre_filter.is_success() {
            info!("Pod {} rejected in PreFilter: {}", pod.key(), pre_filter.message());
            let statuses: HashMap<String, Status> = cluster
                .nodes
                .iter()
                .map(|n| (n.name().to_string(), pre_filter.clone()))
                .collect();
            return self.post_filter(&state, pod, cluster, &statuses, pdbs, pre_filter, true);
        }

        let mut feasible = Vec::new();
        let mut statuses = HashMap::new();
        for node in &cluster.nodes {
            let status = self.framework.run_filter_plugins_with_nominated_pods(
                &state,
                pod,
                node,
                cluster.nominated_pods_for_node(node.name()),
            );
            if status.is_success() {
                feasible.push(node.name());
            } else {
                debug!("Pod {} does not fit on {}: {}", pod.key(), node.name(), status);
                statuses.insert(node.name().to_string(), status);
            }
        }

        if feasible.is_empty() {
            let status = fit_error(cluster.nodes.len(), &statuses);
            info!("No eligible nodes for pod {}: {}", pod.key(), status.message());
            return self.post_filter(&state, pod, cluster, &statuses, pdbs, status, false);
        }

        // Round-robin selection among feasible nodes
        let idx = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % feasible.len();
        let selected = feasible[idx].to_string();

        let reserve = self.capacity.reserve(pod, &selected);
        if !reserve.is_success() {
            return ScheduleResult::Unschedulable {
                status: reserve,
                rejected_in_pre_filter: false,
                preemption_status: None,
            };
        }

        info!("Scheduled pod {} → node {}", pod.key(), selected);
        ScheduleResult::Scheduled { node: selected }
    }

    #[allow(clippy::too_many_arguments)]
    fn post_filter(
        &self,
        state: &CycleState,
        pod: &Pod,
        cluster: &ClusterSnapshot,
        statuses: &HashMap<String, Status>,
        pdbs: &[PodDisruptionBudget],
        status: Status,
        rejected_in_pre_filter: bool,
    ) -> ScheduleResult {
        if status.code == Code::Error {
            return ScheduleResult::Unschedulable {
                status,
                rejected_in_pre_filter,
                preemption_status: None,
            };
        }
        match Evaluator::new(&self.framework).preempt(state, pod, cluster, statuses, pdbs) {
            Ok(candidate) => {
                info!(
                    "Pod {} nominated to {} after preempting {} pod(s)",
                    pod.key(),
                    candidate.node_name,
                    candidate.victims.len()
                );
                ScheduleResult::Preempting {
                    node: candidate.node_name,
                    victims: candidate.victims,
                }
            }
            Err(preemption) => {
                debug!("Preemption for {} failed: {}", pod.key(), preemption.message());
                ScheduleResult::Unschedulable {
                    status,
                    rejected_in_pre_filter,
                    preemption_status: Some(preemption),
                }
            }
        }
    }
}

/// "0/N nodes are available: 2 Insufficient cpu, 1 node n3 is NotReady."
fn fit_error(total: usize, statuses: &HashMap<String, Status>) -> Status {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for status in statuses.values() {
        for reason in &status.reasons {
            *counts.entry(reason.clone()).or_default() += 1;
        }
    }
    let summary: Vec<String> = counts
        .iter()
        .map(|(reason, n)| format!("{} {}", n, reason))
        .collect();
    let code = if !statuses.is_empty()
        && statuses
            .values()
            .all(|s| s.code == Code::UnschedulableAndUnresolvable)
    {
        Code::UnschedulableAndUnresolvable
    } else {
        Code::Unschedulable
    };
    Status::new(
        code,
        format!("0/{} nodes are available: {}", total, summary.join(", ")),
    )
}
