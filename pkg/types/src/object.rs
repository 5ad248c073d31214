use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

use pkg_constants::state::{
    KIND_COMPOSITE_ELASTIC_QUOTAS, KIND_ELASTIC_QUOTAS, KIND_NODES, KIND_PODS,
    KIND_POD_DISRUPTION_BUDGETS, REGISTRY_ROOT,
};

use crate::node::Node;
use crate::pdb::PodDisruptionBudget;
use crate::pod::Pod;
use crate::quota::{CompositeElasticQuota, ElasticQuota};

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An object persisted in the state store under `/registry/<kind>/...`.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: &'static str;
    const NAMESPACED: bool = true;

    fn namespace(&self) -> &str;
    fn name(&self) -> &str;

    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    fn storage_key(&self) -> String {
        if Self::NAMESPACED {
            namespaced_key(Self::KIND, self.namespace(), self.name())
        } else {
            cluster_key(Self::KIND, self.name())
        }
    }
}

/// Prefix covering every object of a kind, or of a kind in one namespace.
pub fn kind_prefix(kind: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}{}/{}/", REGISTRY_ROOT, kind, ns),
        None => format!("{}{}/", REGISTRY_ROOT, kind),
    }
}

pub fn namespaced_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}{}/{}/{}", REGISTRY_ROOT, kind, namespace, name)
}

pub fn cluster_key(kind: &str, name: &str) -> String {
    format!("{}{}/{}", REGISTRY_ROOT, kind, name)
}

/// Split `/registry/<kind>/...` into the kind and the remainder.
pub fn parse_storage_key(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(REGISTRY_ROOT)?.split_once('/')
}

impl Object for Pod {
    const KIND: &'static str = KIND_PODS;

    fn namespace(&self) -> &str {
        &self.namespace
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Object for Node {
    const KIND: &'static str = KIND_NODES;
    const NAMESPACED: bool = false;

    fn namespace(&self) -> &str {
        ""
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Object for ElasticQuota {
    const KIND: &'static str = KIND_ELASTIC_QUOTAS;

    fn namespace(&self) -> &str {
        &self.namespace
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Object for CompositeElasticQuota {
    const KIND: &'static str = KIND_COMPOSITE_ELASTIC_QUOTAS;

    fn namespace(&self) -> &str {
        &self.namespace
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Object for PodDisruptionBudget {
    const KIND: &'static str = KIND_POD_DISRUPTION_BUDGETS;

    fn namespace(&self) -> &str {
        &self.namespace
    }
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceVector;

    #[test]
    fn storage_keys() {
        let q = ElasticQuota::new("team-a", "quota", ResourceVector::new(), None);
        assert_eq!(q.storage_key(), "/registry/elasticquotas/team-a/quota");
        let n = Node::new("gpu-1", ResourceVector::new());
        assert_eq!(n.storage_key(), "/registry/nodes/gpu-1");
        assert_eq!(
            parse_storage_key("/registry/pods/ml/trainer"),
            Some(("pods", "ml/trainer"))
        );
        assert_eq!(kind_prefix(KIND_PODS, Some("ml")), "/registry/pods/ml/");
    }
}
