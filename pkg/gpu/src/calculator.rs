use pkg_constants::resources::{RESOURCE_GPU_MEMORY, RESOURCE_NVIDIA_GPU};
use pkg_types::{Pod, ResourceName, ResourceVector};

use crate::partition::parse_partition_resource;

/// Maps a pod to the aggregate resource vector it requests, including the
/// synthetic GPU memory dimension.
#[derive(Debug, Clone, Copy)]
pub struct ResourceCalculator {
    /// Memory (GB) assumed for one whole GPU device.
    pub gpu_device_memory_gb: i64,
}

impl ResourceCalculator {
    pub fn new(gpu_device_memory_gb: i64) -> Self {
        Self { gpu_device_memory_gb }
    }

    /// Regular containers run together and are summed; init containers run
    /// one at a time and only the largest counts. The result is the
    /// componentwise max of the two, with `gpu-memory` attached.
    pub fn compute_pod_request(&self, pod: &Pod) -> ResourceVector {
        let mut containers = ResourceVector::new();
        for c in &pod.spec.containers {
            containers += &c.resources.requests;
        }
        if let Some(overhead) = &pod.spec.overhead {
            containers += overhead;
        }

        let mut init = ResourceVector::new();
        for c in &pod.spec.init_containers {
            init = init.max(&c.resources.requests);
        }

        let mut request = containers.max(&init);
        let gpu_memory = self.required_gpu_memory_gb(&request);
        request.set(ResourceName::scalar(RESOURCE_GPU_MEMORY), gpu_memory);
        request
    }

    /// Whole GPUs times the device memory, plus each partition's own memory
    /// times its count.
    pub fn required_gpu_memory_gb(&self, request: &ResourceVector) -> i64 {
        let mut total: i64 = 0;
        for (name, quantity) in request.iter() {
            let ResourceName::Scalar(scalar) = name else {
                continue;
            };
            if scalar == RESOURCE_NVIDIA_GPU {
                total = total.saturating_add(self.gpu_device_memory_gb.saturating_mul(quantity));
            } else if let Some(profile) = parse_partition_resource(scalar) {
                total = total.saturating_add(profile.memory_gb.saturating_mul(quantity));
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::{ContainerSpec, PodSpec};

    fn gpu_memory(v: &ResourceVector) -> i64 {
        v.scalar(RESOURCE_GPU_MEMORY)
    }

    fn pod(containers: Vec<ResourceVector>, init: Vec<ResourceVector>) -> Pod {
        let spec = PodSpec {
            containers: containers
                .into_iter()
                .enumerate()
                .map(|(i, r)| ContainerSpec::new(&format!("c{}", i), r))
                .collect(),
            init_containers: init
                .into_iter()
                .enumerate()
                .map(|(i, r)| ContainerSpec::new(&format!("init{}", i), r))
                .collect(),
            ..Default::default()
        };
        Pod::new("ns", "p", spec)
    }

    #[test]
    fn init_containers_take_max_regular_containers_sum() {
        let gb = 1_000_000_000;
        let p = pod(
            vec![
                ResourceVector::new().with(ResourceName::Cpu, 2000).with(ResourceName::Memory, gb),
                ResourceVector::new().with(ResourceName::Cpu, 1000).with(ResourceName::Memory, gb),
            ],
            vec![
                ResourceVector::new().with(ResourceName::Cpu, 2000).with(ResourceName::Memory, gb),
                ResourceVector::new().with(ResourceName::Cpu, 2000).with(ResourceName::Memory, 3 * gb),
            ],
        );
        let req = ResourceCalculator::new(32).compute_pod_request(&p);
        assert_eq!(req.milli_cpu(), 3000);
        assert_eq!(req.memory(), 3 * gb);
        assert_eq!(gpu_memory(&req), 0);
    }

    #[test]
    fn no_init_containers_is_plain_sum() {
        let p = pod(
            vec![
                ResourceVector::new().with(ResourceName::Cpu, 100),
                ResourceVector::new().with(ResourceName::Cpu, 250),
            ],
            vec![],
        );
        let req = ResourceCalculator::new(32).compute_pod_request(&p);
        assert_eq!(req.milli_cpu(), 350);
    }

    #[test]
    fn overhead_is_added() {
        let mut p = pod(vec![ResourceVector::new().with(ResourceName::Cpu, 100)], vec![]);
        p.spec.overhead = Some(ResourceVector::new().with(ResourceName::Cpu, 50));
        let req = ResourceCalculator::new(32).compute_pod_request(&p);
        assert_eq!(req.milli_cpu(), 150);
    }

    #[test]
    fn gpu_memory_from_whole_gpus() {
        let p = pod(
            vec![ResourceVector::new()
                .with(ResourceName::Cpu, 500)
                .with(RESOURCE_NVIDIA_GPU, 1)],
            vec![],
        );
        let req = ResourceCalculator::new(8).compute_pod_request(&p);
        let expected = ResourceVector::new()
            .with(ResourceName::Cpu, 500)
            .with(RESOURCE_NVIDIA_GPU, 1)
            .with(RESOURCE_GPU_MEMORY, 8);
        assert_eq!(req, expected);
    }

    #[test]
    fn gpu_memory_from_partitions() {
        let request = ResourceVector::new()
            .with(RESOURCE_NVIDIA_GPU, 2)
            .with("nvidia.com/mig-1g.10gb", 3)
            .with("nvidia.com/mig-3g.40gb", 1);
        let calc = ResourceCalculator::new(16);
        assert_eq!(calc.required_gpu_memory_gb(&request), 2 * 16 + 3 * 10 + 40);
    }
}
