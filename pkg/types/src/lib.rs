pub mod config;
pub mod node;
pub mod object;
pub mod pdb;
pub mod pod;
pub mod quantity;
pub mod quota;
pub mod resource;
pub mod validate;

pub use node::{Node, NodeStatus, Taint};
pub use object::{Object, ObjectKey};
pub use pdb::{LabelSelector, PdbStatus, PodDisruptionBudget};
pub use pod::{
    CapacityInfo, ContainerSpec, Pod, PodPhase, PodSpec, PreemptionPolicy, ResourceRequirements,
    TaintEffect, Toleration, TolerationOperator,
};
pub use quota::{CompositeElasticQuota, CompositeQuotaSpec, ElasticQuota, QuotaLimits, QuotaStatus};
pub use resource::{ResourceName, ResourceVector};
