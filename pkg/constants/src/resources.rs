//! Resource names understood by the resource calculator and the quota machinery.

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// Whole-GPU resource exposed by the NVIDIA device plugin.
pub const RESOURCE_NVIDIA_GPU: &str = "nvidia.com/gpu";

/// Synthetic resource holding the GPU memory (GB) requested by a workload.
pub const RESOURCE_GPU_MEMORY: &str = "elastiq.io/gpu-memory";

/// Partitioned-GPU resources, e.g. `nvidia.com/mig-1g.10gb`.
/// Capture groups 1, 3 and 4 hold the vendor, slice count and memory in GB.
pub const REGEX_PARTITION_RESOURCE: &str = r"^([a-z0-9]([-a-z0-9.]*[a-z0-9])?)/mig-(\d+)g\.(\d+)gb$";

/// Default memory (GB) assumed for one whole GPU device.
pub const DEFAULT_GPU_DEVICE_MEMORY_GB: i64 = 32;
