//! GPU-aware resource accounting: the per-pod request calculator and
//! partitioned-GPU resource name parsing.

pub mod calculator;
pub mod partition;

pub use calculator::ResourceCalculator;
pub use partition::{PartitionProfile, is_partition_resource, parse_partition_resource};
