//! Guaranteed overquota: each quota's share of the minimum that other
//! quotas leave unused, proportional to its own `min`.

use std::collections::BTreeSet;

use pkg_types::{ResourceName, ResourceVector};

use crate::quota_info::{QuotaInfo, QuotaInfos};

/// Σ max(0, min - used) over the active quotas.
pub fn aggregated_unused(infos: &QuotaInfos) -> ResourceVector {
    let mut total = ResourceVector::new();
    for q in infos.active() {
        total += &q.min.sub_non_negative(&q.used);
    }
    total
}

/// ⌊aggregated_unused[r] × min[r] / Σ min[r]⌋ for every resource named by any
/// quota's `min`. Zero where the denominator is zero.
pub fn guaranteed_overquota(infos: &QuotaInfos, quota: &QuotaInfo) -> ResourceVector {
    let names: BTreeSet<ResourceName> = infos
        .active()
        .flat_map(|q| q.min.names().cloned())
        .collect();
    let unused = aggregated_unused(infos);
    let total_min = infos.aggregated_min();

    names
        .into_iter()
        .map(|name| {
            let denominator = total_min.get(&name) as i128;
            let share = if denominator > 0 {
                let numerator = unused.get(&name) as i128 * quota.min.get(&name) as i128;
                (numerator / denominator) as i64
            } else {
                0
            };
            (name, share)
        })
        .collect()
}

/// Guaranteed overquota of the quota governing `namespace`, if any.
pub fn guaranteed_overquota_for(infos: &QuotaInfos, namespace: &str) -> Option<ResourceVector> {
    infos
        .lookup(namespace)
        .map(|q| guaranteed_overquota(infos, q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota_info::QuotaKind;

    fn quota(ns: &str, min: ResourceVector, used: i64) -> QuotaInfo {
        let mut q = QuotaInfo::new(
            ns,
            "quota",
            QuotaKind::Simple,
            BTreeSet::from([ns.to_string()]),
            min,
            None,
        );
        q.add_pod_if_not_present(
            &format!("{}/filler", ns),
            &ResourceVector::new().with(ResourceName::Cpu, used),
        );
        q
    }

    fn cpu(v: i64) -> ResourceVector {
        ResourceVector::new().with(ResourceName::Cpu, v)
    }

    fn registry() -> QuotaInfos {
        let mut infos = QuotaInfos::new();
        infos.add(quota("a", cpu(100), 350));
        infos.add(quota("b", cpu(50), 0));
        infos.add(quota("c", cpu(200), 50));
        infos
    }

    #[test]
    fn unused_minimum_is_pooled() {
        // 0 + 50 + 150
        assert_eq!(aggregated_unused(&registry()).milli_cpu(), 200);
    }

    #[test]
    fn share_is_proportional_to_min() {
        let infos = registry();
        let a = guaranteed_overquota_for(&infos, "a").unwrap();
        let b = guaranteed_overquota_for(&infos, "b").unwrap();
        let c = guaranteed_overquota_for(&infos, "c").unwrap();
        // 200 × 100/350, 200 × 50/350, 200 × 200/350
        assert_eq!(a.milli_cpu(), 57);
        assert_eq!(b.milli_cpu(), 28);
        assert_eq!(c.milli_cpu(), 114);
        assert!(a.milli_cpu() + b.milli_cpu() + c.milli_cpu() <= 200);
    }

    #[test]
    fn vector_covers_every_min_resource() {
        let mut infos = QuotaInfos::new();
        infos.add(quota("a", cpu(100), 0));
        infos.add(quota(
            "b",
            ResourceVector::new().with("elastiq.io/gpu-memory", 32),
            0,
        ));
        let a = guaranteed_overquota_for(&infos, "a").unwrap();
        assert!(a.contains(&ResourceName::scalar("elastiq.io/gpu-memory")));
        assert_eq!(a.scalar("elastiq.io/gpu-memory"), 0);
        assert_eq!(a.milli_cpu(), 100);
    }

    #[test]
    fn no_quotas_no_overquota() {
        let infos = QuotaInfos::new();
        assert!(aggregated_unused(&infos).is_empty());
        assert!(guaranteed_overquota_for(&infos, "a").is_none());
    }
}
