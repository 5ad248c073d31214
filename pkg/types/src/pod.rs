use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pkg_constants::labels::{CAPACITY_IN_QUOTA, CAPACITY_OVER_QUOTA, LABEL_CAPACITY_INFO};

use crate::resource::ResourceVector;

// --- Resource requirements ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceVector,
    #[serde(default)]
    pub limits: ResourceVector,
}

// --- Container spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl ContainerSpec {
    pub fn new(name: &str, requests: ResourceVector) -> Self {
        Self {
            name: name.to_string(),
            image: String::new(),
            resources: ResourceRequirements {
                requests,
                limits: ResourceVector::default(),
            },
        }
    }
}

// --- Pod phase ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Succeeded or Failed: the pod will never run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Capacity info ---

/// Value of the capacity-info label written by the quota reconcilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityInfo {
    InQuota,
    OverQuota,
}

impl CapacityInfo {
    pub fn as_str(self) -> &'static str {
        match self {
            CapacityInfo::InQuota => CAPACITY_IN_QUOTA,
            CapacityInfo::OverQuota => CAPACITY_OVER_QUOTA,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            CAPACITY_IN_QUOTA => Some(CapacityInfo::InQuota),
            CAPACITY_OVER_QUOTA => Some(CapacityInfo::OverQuota),
            _ => None,
        }
    }
}

impl std::fmt::Display for CapacityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Pod spec ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PreemptionPolicy {
    #[default]
    PreemptLowerPriority,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub init_containers: Vec<ContainerSpec>,
    /// Fixed per-pod cost added on top of the container requests.
    #[serde(default)]
    pub overhead: Option<ResourceVector>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub preemption_policy: PreemptionPolicy,
    #[serde(default)]
    pub node_affinity: HashMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toleration {
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum TaintEffect {
    #[default]
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pod {
    /// Unique id, stable across updates.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub spec: PodSpec,
    #[serde(default)]
    pub phase: PodPhase,
    /// The node this pod is bound to (set by the scheduler)
    #[serde(default)]
    pub node_name: Option<String>,
    /// Node picked during preemption, waiting for victims to go away.
    #[serde(default)]
    pub nominated_node_name: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Pod {
    pub fn new(namespace: &str, name: &str, spec: PodSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            spec,
            phase: PodPhase::Pending,
            node_name: None,
            nominated_node_name: None,
            labels: HashMap::new(),
            created_at: Utc::now(),
            start_time: None,
            deletion_timestamp: None,
        }
    }

    /// `namespace/name`, used as the membership key in quota records.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn priority(&self) -> i32 {
        self.spec.priority
    }

    pub fn is_assigned(&self) -> bool {
        self.node_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn capacity_info(&self) -> Option<CapacityInfo> {
        self.labels
            .get(LABEL_CAPACITY_INFO)
            .and_then(|v| CapacityInfo::parse(v))
    }

    pub fn is_over_quota(&self) -> bool {
        self.capacity_info() == Some(CapacityInfo::OverQuota)
    }

    /// Ordering used to rank pods by importance: higher priority first,
    /// then the pod that started earlier.
    pub fn more_important_than(&self, other: &Pod) -> std::cmp::Ordering {
        other
            .priority()
            .cmp(&self.priority())
            .then_with(|| {
                let a = self.start_time.unwrap_or(self.created_at);
                let b = other.start_time.unwrap_or(other.created_at);
                a.cmp(&b)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pod(name: &str, priority: i32) -> Pod {
        Pod::new(
            "team-a",
            name,
            PodSpec {
                priority,
                ..Default::default()
            },
        )
    }

    #[test]
    fn capacity_label_parsing() {
        let mut p = pod("p", 0);
        assert_eq!(p.capacity_info(), None);
        p.labels
            .insert(LABEL_CAPACITY_INFO.to_string(), "over-quota".to_string());
        assert!(p.is_over_quota());
        p.labels
            .insert(LABEL_CAPACITY_INFO.to_string(), "garbage".to_string());
        assert_eq!(p.capacity_info(), None);
    }

    #[test]
    fn importance_prefers_priority_then_age() {
        let high = pod("high", 100);
        let low = pod("low", 1);
        assert_eq!(high.more_important_than(&low), std::cmp::Ordering::Less);

        let mut old = pod("old", 5);
        let mut young = pod("young", 5);
        old.start_time = Some(Utc::now() - Duration::hours(1));
        young.start_time = Some(Utc::now());
        let mut pods = vec![young.clone(), old.clone()];
        pods.sort_by(|a, b| a.more_important_than(b));
        assert_eq!(pods[0].name, "old");
    }

    #[test]
    fn pod_deserializes_with_defaults() {
        let p: Pod = serde_json::from_str(
            r#"{
                "id": "1",
                "name": "trainer",
                "namespace": "ml",
                "spec": {"containers": [{"name": "main", "resources": {"requests": {"cpu": "500m", "nvidia.com/gpu": 1}}}]},
                "created_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(p.phase, PodPhase::Pending);
        assert_eq!(p.spec.preemption_policy, PreemptionPolicy::PreemptLowerPriority);
        assert_eq!(p.spec.containers[0].resources.requests.milli_cpu(), 500);
        assert!(!p.is_assigned());
    }
}
