//! Scheduler plugin constants and user-visible rejection reasons.

/// Name of the capacity scheduling plugin, used in logs and status messages.
pub const CAPACITY_SCHEDULING_PLUGIN: &str = "CapacityScheduling";

/// Name of the node resource fit filter.
pub const NODE_RESOURCES_FIT_PLUGIN: &str = "NodeResourcesFit";

pub const REASON_MAX_QUOTA_EXCEEDED: &str = "max quota exceeded";
pub const REASON_TOTAL_MIN_QUOTA_EXCEEDED: &str = "total min quota exceeded";
pub const REASON_PREEMPTION_POLICY_NEVER: &str = "not eligible due to preemptionPolicy=Never";
pub const REASON_TERMINATING_ON_NOMINATED_NODE: &str =
    "not eligible due to a terminating pod on the nominated node";
pub const REASON_MISSING_CYCLE_STATE: &str = "not eligible due to failed to read from cycleState";

/// Default interval between two scheduling passes over pending workloads.
pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 1;
