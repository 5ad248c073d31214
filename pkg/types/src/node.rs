use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pod::TaintEffect;
use crate::resource::ResourceVector;

// --- Node status ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Ready,
    NotReady,
    Unknown,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Ready => write!(f, "Ready"),
            NodeStatus::NotReady => write!(f, "NotReady"),
            NodeStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Taint ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

// --- Persisted Node object ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Resources available to pods, including partitioned GPU resources.
    #[serde(default)]
    pub allocatable: ResourceVector,
    /// If true, the scheduler will not place new pods on this node.
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
}

impl Node {
    pub fn new(name: &str, allocatable: ResourceVector) -> Self {
        Self {
            name: name.to_string(),
            status: NodeStatus::Ready,
            labels: HashMap::new(),
            taints: Vec::new(),
            allocatable,
            unschedulable: false,
            registered_at: Utc::now(),
        }
    }
}
