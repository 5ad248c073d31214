//! State store key layout.
//!
//! Objects live under `/registry/<kind>/<namespace>/<name>`; cluster-scoped
//! objects (nodes) under `/registry/<kind>/<name>`.

pub const REGISTRY_ROOT: &str = "/registry/";

pub const KIND_PODS: &str = "pods";
pub const KIND_NODES: &str = "nodes";
pub const KIND_ELASTIC_QUOTAS: &str = "elasticquotas";
pub const KIND_COMPOSITE_ELASTIC_QUOTAS: &str = "compositeelasticquotas";
pub const KIND_POD_DISRUPTION_BUDGETS: &str = "poddisruptionbudgets";

/// Number of recent watch events retained for `events_since` queries.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Capacity of the broadcast channel fanning out watch events to controllers.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
