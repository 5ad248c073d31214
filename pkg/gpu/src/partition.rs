use regex::Regex;
use std::sync::LazyLock;

use pkg_constants::resources::REGEX_PARTITION_RESOURCE;
use pkg_types::ResourceName;

static PARTITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(REGEX_PARTITION_RESOURCE).expect("partition resource regex is valid")
});

/// A partitioned-GPU profile decoded from a resource name such as
/// `nvidia.com/mig-1g.10gb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionProfile {
    pub vendor: String,
    pub slices: u32,
    pub memory_gb: i64,
}

pub fn parse_partition_resource(name: &str) -> Option<PartitionProfile> {
    let caps = PARTITION_RE.captures(name)?;
    Some(PartitionProfile {
        vendor: caps.get(1)?.as_str().to_string(),
        slices: caps.get(3)?.as_str().parse().ok()?,
        memory_gb: caps.get(4)?.as_str().parse().ok()?,
    })
}

pub fn is_partition_resource(name: &ResourceName) -> bool {
    match name {
        ResourceName::Scalar(s) => PARTITION_RE.is_match(s),
        _ => false,
    }
}
