use pkg_constants::resources::RESOURCE_GPU_MEMORY;
use pkg_constants::scheduler::NODE_RESOURCES_FIT_PLUGIN;
use pkg_gpu::ResourceCalculator;
use pkg_types::node::NodeStatus;
use pkg_types::pod::{Pod, TaintEffect, TolerationOperator};
use pkg_types::ResourceName;

use crate::framework::{Code, CycleState, FilterPlugin, NodeInfo, Status};

/// Filters nodes on readiness, cordon, node affinity, taints and free
/// resources.
pub struct NodeResourcesFit {
    calculator: ResourceCalculator,
}

impl NodeResourcesFit {
    pub fn new(calculator: ResourceCalculator) -> Self {
        Self { calculator }
    }

    fn check_node(&self, node: &NodeInfo, pod: &Pod) -> Status {
        let n = &node.node;

        // 1. Node must be Ready
        if n.status != NodeStatus::Ready {
            return Status::unresolvable(format!("node {} is {}", n.name, n.status));
        }

        // 2. Node must not be unschedulable (cordoned)
        if n.unschedulable {
            return Status::unresolvable(format!("node {} is unschedulable", n.name));
        }

        // 3. Check node affinity (all required labels must match)
        for (key, value) in &pod.spec.node_affinity {
            match n.labels.get(key) {
                Some(v) if v == value => {}
                _ => {
                    return Status::unresolvable(format!(
                        "node {} didn't match node affinity {}={}",
                        n.name, key, value
                    ));
                }
            }
        }

        // 4. Check taints & tolerations
        for taint in &n.taints {
            let tolerated = pod.spec.tolerations.iter().any(|t| {
                if t.key != taint.key {
                    return false;
                }
                match t.operator {
                    TolerationOperator::Exists => true,
                    TolerationOperator::Equal => t.value == taint.value,
                }
            });
            if !tolerated {
                match taint.effect {
                    TaintEffect::NoSchedule | TaintEffect::NoExecute => {
                        return Status::unresolvable(format!(
                            "node {} has untolerated taint {}",
                            n.name, taint.key
                        ));
                    }
                    TaintEffect::PreferNoSchedule => {} // soft preference, don't reject
                }
            }
        }

        // 5. Check resource availability
        let request = self.calculator.compute_pod_request(pod);
        let mut insufficient = Vec::new();

        if n.allocatable.contains(&ResourceName::Pods)
            && node.pods.len() as i64 + 1 > n.allocatable.pods()
        {
            insufficient.push(format!("Too many pods on node {}", n.name));
        }
        for (name, quantity) in request.iter() {
            if quantity <= 0 || name.as_str() == RESOURCE_GPU_MEMORY || *name == ResourceName::Pods {
                continue;
            }
            let free = n.allocatable.get(name) - node.requested.get(name);
            if quantity > free {
                insufficient.push(format!("Insufficient {}", name));
            }
        }

        if insufficient.is_empty() {
            Status::success()
        } else {
            Status {
                code: Code::Unschedulable,
                reasons: insufficient,
            }
        }
    }
}

impl FilterPlugin for NodeResourcesFit {
    fn name(&self) -> &str {
        NODE_RESOURCES_FIT_PLUGIN
    }

    fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
        self.check_node(node, pod)
    }
}
