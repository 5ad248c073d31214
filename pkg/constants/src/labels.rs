//! Workload label constants.

/// Label written by the quota reconcilers on every running workload governed by a quota.
/// Read by the scheduler when selecting preemption victims.
pub const LABEL_CAPACITY_INFO: &str = "elastiq.io/capacity-info";

/// Value of [`LABEL_CAPACITY_INFO`] for workloads that fit within their quota's `min`.
pub const CAPACITY_IN_QUOTA: &str = "in-quota";

/// Value of [`LABEL_CAPACITY_INFO`] for workloads borrowing capacity beyond `min`.
pub const CAPACITY_OVER_QUOTA: &str = "over-quota";
