use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pkg_gpu::ResourceCalculator;
use pkg_types::{Node, Pod, ResourceVector};

use crate::quota_info::QuotaInfos;

// --- Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Success,
    /// The pod does not fit now; preemption may help.
    Unschedulable,
    /// The pod cannot fit no matter what is evicted.
    UnschedulableAndUnresolvable,
    Error,
}

/// Outcome of a plugin call. Rejections are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub reasons: Vec<String>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: Code::Success,
            reasons: Vec::new(),
        }
    }

    pub fn new(code: Code, reason: impl Into<String>) -> Self {
        Self {
            code,
            reasons: vec![reason.into()],
        }
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::new(Code::Unschedulable, reason)
    }

    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self::new(Code::UnschedulableAndUnresolvable, reason)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Code::Error, reason)
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message())
    }
}

// --- Cycle state ---

/// Requests computed once in PreFilter and reused by preemption.
#[derive(Debug, Clone, Default)]
pub struct PreFilterState {
    pub pod_req: ResourceVector,
    /// `pod_req` plus nominated pods of the same quota with priority >= the pod's.
    pub nominated_in_quota_with_req: ResourceVector,
    /// The above plus nominated pods of other quotas still within their `min`.
    pub nominated_total_with_req: ResourceVector,
}

/// Data carried through one scheduling cycle. Cloned for each dry-run so
/// hypothetical pod moves never leak between nodes.
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    pub pre_filter: Option<PreFilterState>,
    pub quota_snapshot: Option<QuotaInfos>,
}

// --- Node view ---

#[derive(Debug, Clone)]
pub struct PodInfo {
    pub pod: Pod,
    pub request: ResourceVector,
}

impl PodInfo {
    pub fn new(pod: Pod, calculator: &ResourceCalculator) -> Self {
        let request = calculator.compute_pod_request(&pod);
        Self { pod, request }
    }
}

/// A node with the pods bound to it and the sum of their requests.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node: Node,
    pub pods: Vec<PodInfo>,
    pub requested: ResourceVector,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            pods: Vec::new(),
            requested: ResourceVector::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn add_pod(&mut self, info: PodInfo) {
        self.requested += &info.request;
        self.pods.push(info);
    }

    pub fn remove_pod(&mut self, pod_key: &str) -> anyhow::Result<PodInfo> {
        let idx = self
            .pods
            .iter()
            .position(|p| p.pod.key() == pod_key)
            .ok_or_else(|| {
                anyhow::anyhow!("pod {} not found on node {}", pod_key, self.node.name)
            })?;
        let info = self.pods.remove(idx);
        self.requested = self.requested.sub_non_negative(&info.request);
        Ok(info)
    }
}

/// Point-in-time view of the cluster used for one scheduling cycle.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeInfo>,
    /// Pods waiting on a nominated node, keyed by node name.
    pub nominated: HashMap<String, Vec<PodInfo>>,
}

impl ClusterSnapshot {
    /// Bound, non-terminal pods go to their node; unbound pods with a
    /// nominated node are tracked as nominated.
    pub fn build(nodes: Vec<Node>, pods: &[Pod], calculator: &ResourceCalculator) -> Self {
        let mut infos: Vec<NodeInfo> = nodes.into_iter().map(NodeInfo::new).collect();
        let mut nominated: HashMap<String, Vec<PodInfo>> = HashMap::new();
        for pod in pods {
            if pod.phase.is_terminal() {
                continue;
            }
            if let Some(node_name) = pod.node_name.as_deref().filter(|n| !n.is_empty()) {
                if let Some(info) = infos.iter_mut().find(|n| n.node.name == node_name) {
                    info.add_pod(PodInfo::new(pod.clone(), calculator));
                }
            } else if let Some(nominated_node) = pod.nominated_node_name.as_deref() {
                nominated
                    .entry(nominated_node.to_string())
                    .or_default()
                    .push(PodInfo::new(pod.clone(), calculator));
            }
        }
        Self {
            nodes: infos,
            nominated,
        }
    }

    pub fn node_info(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.node.name == name)
    }

    pub fn nominated_pods_for_node(&self, name: &str) -> &[PodInfo] {
        self.nominated.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_nominated(&self) -> impl Iterator<Item = &PodInfo> {
        self.nominated.values().flatten()
    }
}

// --- Plugin seams ---

pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status;
}

/// Keeps PreFilter-derived state consistent when a dry-run adds or
/// removes pods from a node.
pub trait PreFilterExtensions: Send + Sync {
    fn add_pod(&self, state: &mut CycleState, pod_to_schedule: &Pod, pod_to_add: &PodInfo) -> Status;

    fn remove_pod(&self, state: &mut CycleState, pod_to_schedule: &Pod, pod_to_remove: &PodInfo) -> Status;
}

/// The filter chain plus the extensions that track dry-run pod moves.
#[derive(Clone, Default)]
pub struct Framework {
    filters: Vec<Arc<dyn FilterPlugin>>,
    extensions: Vec<Arc<dyn PreFilterExtensions>>,
}

impl Framework {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, plugin: Arc<dyn FilterPlugin>) -> Self {
        self.filters.push(plugin);
        self
    }

    pub fn with_extensions(mut self, ext: Arc<dyn PreFilterExtensions>) -> Self {
        self.extensions.push(ext);
        self
    }

    pub fn run_filter_plugins(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
        for plugin in &self.filters {
            let status = plugin.filter(state, pod, node);
            if !status.is_success() {
                return status;
            }
        }
        Status::success()
    }

    /// Run the filters twice: once with the node's nominated pods of equal or
    /// higher priority added, and once as is. The pod fits only if both pass.
    pub fn run_filter_plugins_with_nominated_pods(
        &self,
        state: &CycleState,
        pod: &Pod,
        node: &NodeInfo,
        nominated: &[PodInfo],
    ) -> Status {
        let pod_key = pod.key();
        let relevant: Vec<&PodInfo> = nominated
            .iter()
            .filter(|p| p.pod.key() != pod_key && p.pod.priority() >= pod.priority())
            .collect();

        if !relevant.is_empty() {
            let mut state_with = state.clone();
            let mut node_with = node.clone();
            for info in relevant {
                node_with.add_pod(info.clone());
                let status = self.run_pre_filter_extension_add_pod(&mut state_with, pod, info);
                if !status.is_success() {
                    return status;
                }
            }
            let status = self.run_filter_plugins(&state_with, pod, &node_with);
            if !status.is_success() {
                return status;
            }
        }
        self.run_filter_plugins(state, pod, node)
    }

    pub fn run_pre_filter_extension_add_pod(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        to_add: &PodInfo,
    ) -> Status {
        for ext in &self.extensions {
            let status = ext.add_pod(state, pod, to_add);
            if !status.is_success() {
                return status;
            }
        }
        Status::success()
    }

    pub fn run_pre_filter_extension_remove_pod(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        to_remove: &PodInfo,
    ) -> Status {
        for ext in &self.extensions {
            let status = ext.remove_pod(state, pod, to_remove);
            if !status.is_success() {
                return status;
            }
        }
        Status::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::{ContainerSpec, PodPhase, PodSpec, ResourceName};

    fn pod(name: &str, cpu: i64) -> Pod {
        Pod::new(
            "ns",
            name,
            PodSpec {
                containers: vec![ContainerSpec::new(
                    "c",
                    ResourceVector::new().with(ResourceName::Cpu, cpu),
                )],
                ..Default::default()
            },
        )
    }

    #[test]
    fn snapshot_places_bound_and_nominated_pods() {
        let calc = ResourceCalculator::new(32);
        let mut bound = pod("bound", 100);
        bound.node_name = Some("n1".into());
        bound.phase = PodPhase::Running;
        let mut done = pod("done", 100);
        done.node_name = Some("n1".into());
        done.phase = PodPhase::Succeeded;
        let mut waiting = pod("waiting", 50);
        waiting.nominated_node_name = Some("n1".into());

        let snapshot = ClusterSnapshot::build(
            vec![Node::new("n1", ResourceVector::new())],
            &[bound, done, waiting],
            &calc,
        );
        let n1 = snapshot.node_info("n1").unwrap();
        assert_eq!(n1.pods.len(), 1);
        assert_eq!(n1.requested.milli_cpu(), 100);
        assert_eq!(snapshot.nominated_pods_for_node("n1").len(), 1);
        assert!(snapshot.nominated_pods_for_node("n2").is_empty());
    }

    #[test]
    fn node_info_remove_pod() {
        let calc = ResourceCalculator::new(32);
        let mut info = NodeInfo::new(Node::new("n1", ResourceVector::new()));
        info.add_pod(PodInfo::new(pod("a", 30), &calc));
        info.add_pod(PodInfo::new(pod("b", 20), &calc));
        let removed = info.remove_pod("ns/a").unwrap();
        assert_eq!(removed.pod.name, "a");
        assert_eq!(info.requested.milli_cpu(), 20);
        assert!(info.remove_pod("ns/a").is_err());
    }

    #[test]
    fn status_message() {
        let s = Status::unschedulable("max quota exceeded");
        assert!(!s.is_success());
        assert_eq!(s.message(), "max quota exceeded");
        assert!(Status::success().is_success());
    }
}
