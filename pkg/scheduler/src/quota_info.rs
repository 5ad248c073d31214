use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use pkg_types::{CompositeElasticQuota, ElasticQuota, ObjectKey, ResourceName, ResourceVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Simple,
    Composite,
}

/// Scheduler-side view of one quota object.
///
/// `used` is rebuilt from pod events and starts at zero; the reconciled
/// `status.used` of the object is not trusted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaInfo {
    pub name: String,
    pub namespace: String,
    pub kind: QuotaKind,
    pub namespaces: BTreeSet<String>,
    pods: BTreeSet<String>,
    pub min: ResourceVector,
    pub max: ResourceVector,
    pub used: ResourceVector,
    pub max_enforced: bool,
}

impl QuotaInfo {
    pub fn new(
        namespace: &str,
        name: &str,
        kind: QuotaKind,
        namespaces: BTreeSet<String>,
        min: ResourceVector,
        max: Option<ResourceVector>,
    ) -> Self {
        let max_enforced = max.is_some();
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind,
            namespaces,
            pods: BTreeSet::new(),
            min,
            max: max.unwrap_or_default(),
            used: ResourceVector::new(),
            max_enforced,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Resources the quota accounts for: the union of `min` and `max` names.
    pub fn tracked_names(&self) -> BTreeSet<ResourceName> {
        self.min.names().chain(self.max.names()).cloned().collect()
    }

    pub fn has_pod(&self, pod_key: &str) -> bool {
        self.pods.contains(pod_key)
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    /// Account a pod once. Returns false if it was already counted.
    pub fn add_pod_if_not_present(&mut self, pod_key: &str, request: &ResourceVector) -> bool {
        if !self.pods.insert(pod_key.to_string()) {
            return false;
        }
        let tracked = request.projected_on(&self.tracked_names());
        self.used += &tracked;
        true
    }

    /// Release a pod previously accounted. Returns false if it was not counted.
    pub fn delete_pod_if_present(&mut self, pod_key: &str, request: &ResourceVector) -> bool {
        if !self.pods.remove(pod_key) {
            return false;
        }
        let tracked = request.projected_on(&self.tracked_names());
        self.used = self.used.sub_non_negative(&tracked);
        true
    }

    /// used > min
    pub fn used_over_min(&self) -> bool {
        self.used.exceeds(&self.min)
    }

    /// used + request > min
    pub fn used_over_min_with(&self, request: &ResourceVector) -> bool {
        self.used.sum(request).exceeds(&self.min)
    }

    /// used + request > max, only when a max is enforced.
    pub fn used_over_max_with(&self, request: &ResourceVector) -> bool {
        self.max_enforced && self.used.sum(request).exceeds(&self.max)
    }

    /// used > limit
    pub fn used_over(&self, limit: &ResourceVector) -> bool {
        self.used.exceeds(limit)
    }

    /// used + request <= limit
    pub fn used_lte_with(&self, limit: &ResourceVector, request: &ResourceVector) -> bool {
        self.used.sum(request).fits_within(limit)
    }
}

impl From<&ElasticQuota> for QuotaInfo {
    fn from(eq: &ElasticQuota) -> Self {
        QuotaInfo::new(
            &eq.namespace,
            &eq.name,
            QuotaKind::Simple,
            BTreeSet::from([eq.namespace.clone()]),
            eq.spec.min.clone(),
            eq.spec.max.clone(),
        )
    }
}

impl From<&CompositeElasticQuota> for QuotaInfo {
    fn from(ceq: &CompositeElasticQuota) -> Self {
        QuotaInfo::new(
            &ceq.namespace,
            &ceq.name,
            QuotaKind::Composite,
            ceq.namespace_set(),
            ceq.spec.min.clone(),
            ceq.spec.max.clone(),
        )
    }
}

/// Registry of quota records, indexed by identity and by governed namespace.
///
/// A namespace binds to at most one record. A composite record wins over a
/// simple one; a simple record whose namespace is claimed stays registered but
/// unbound, and is bound again once the composite goes away. Aggregates only
/// look at bound records, each counted once.
#[derive(Debug, Clone, Default)]
pub struct QuotaInfos {
    quotas: BTreeMap<ObjectKey, QuotaInfo>,
    by_namespace: HashMap<String, ObjectKey>,
}

impl QuotaInfos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, info: QuotaInfo) {
        let key = info.key();
        let namespaces = info.namespaces.clone();
        self.quotas.insert(key.clone(), info);
        for ns in namespaces {
            self.bind(&ns, &key);
        }
    }

    /// Replace a record, keeping the pods and usage already accounted to it.
    pub fn update(&mut self, old: &QuotaInfo, mut new: QuotaInfo) {
        if let Some(existing) = self.quotas.get(&old.key()) {
            new.pods = existing.pods.clone();
            new.used = existing.used.clone();
        }
        if old.key() != new.key() {
            self.remove_record(&old.key());
        }

        let key = new.key();
        let dropped: Vec<String> = old
            .namespaces
            .difference(&new.namespaces)
            .cloned()
            .collect();
        let namespaces = new.namespaces.clone();
        self.quotas.insert(key.clone(), new);
        for ns in &dropped {
            if self.by_namespace.get(ns) == Some(&key) {
                self.by_namespace.remove(ns);
            }
        }
        for ns in namespaces {
            self.bind(&ns, &key);
        }
        self.rebind_orphans(&dropped);
    }

    pub fn delete(&mut self, info: &QuotaInfo) {
        self.remove_record(&info.key());
    }

    pub fn lookup(&self, namespace: &str) -> Option<&QuotaInfo> {
        self.by_namespace
            .get(namespace)
            .and_then(|key| self.quotas.get(key))
    }

    pub fn lookup_mut(&mut self, namespace: &str) -> Option<&mut QuotaInfo> {
        let key = self.by_namespace.get(namespace)?;
        self.quotas.get_mut(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&QuotaInfo> {
        self.quotas.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.by_namespace.is_empty()
    }

    /// Records currently governing at least one namespace.
    pub fn active(&self) -> impl Iterator<Item = &QuotaInfo> {
        let bound: BTreeSet<&ObjectKey> = self.by_namespace.values().collect();
        self.quotas
            .iter()
            .filter(move |(k, _)| bound.contains(k))
            .map(|(_, q)| q)
    }

    pub fn len(&self) -> usize {
        self.active().count()
    }

    pub fn aggregated_min(&self) -> ResourceVector {
        let mut total = ResourceVector::new();
        for q in self.active() {
            total += &q.min;
        }
        total
    }

    pub fn aggregated_used(&self) -> ResourceVector {
        let mut total = ResourceVector::new();
        for q in self.active() {
            total += &q.used;
        }
        total
    }

    /// Σ used + request > Σ min
    pub fn aggregated_used_over_min_with(&self, request: &ResourceVector) -> bool {
        self.aggregated_used()
            .sum(request)
            .exceeds(&self.aggregated_min())
    }

    fn bind(&mut self, namespace: &str, key: &ObjectKey) {
        let Some(incoming) = self.quotas.get(key) else {
            return;
        };
        if let Some(current) = self.by_namespace.get(namespace).and_then(|k| self.quotas.get(k)) {
            if current.key() != *key
                && current.kind == QuotaKind::Composite
                && incoming.kind == QuotaKind::Simple
            {
                debug!(
                    "Namespace {} stays with composite quota {}, ignoring {}",
                    namespace,
                    current.key(),
                    key
                );
                return;
            }
        }
        self.by_namespace.insert(namespace.to_string(), key.clone());
    }

    fn remove_record(&mut self, key: &ObjectKey) {
        let Some(info) = self.quotas.remove(key) else {
            return;
        };
        let released: Vec<String> = info
            .namespaces
            .iter()
            .filter(|ns| self.by_namespace.get(*ns) == Some(key))
            .cloned()
            .collect();
        for ns in &released {
            self.by_namespace.remove(ns);
        }
        self.rebind_orphans(&released);
    }

    /// Give unbound namespaces back to a simple quota that still claims them.
    fn rebind_orphans(&mut self, namespaces: &[String]) {
        for ns in namespaces {
            if self.by_namespace.contains_key(ns) {
                continue;
            }
            let candidate = self
                .quotas
                .values()
                .find(|q| q.namespaces.contains(ns))
                .map(|q| q.key());
            if let Some(key) = candidate {
                self.by_namespace.insert(ns.clone(), key);
            }
        }
    }
}
