use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::resource::ResourceVector;

/// Guaranteed floor and optional ceiling shared by the quota kinds.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QuotaLimits {
    pub min: ResourceVector,
    /// When absent the ceiling is not enforced.
    #[serde(default)]
    pub max: Option<ResourceVector>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QuotaStatus {
    #[serde(default)]
    pub used: ResourceVector,
}

/// Elastic quota governing a single namespace (its own).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElasticQuota {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub spec: QuotaLimits,
    #[serde(default)]
    pub status: QuotaStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ElasticQuota {
    pub fn new(namespace: &str, name: &str, min: ResourceVector, max: Option<ResourceVector>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            spec: QuotaLimits { min, max },
            status: QuotaStatus::default(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CompositeQuotaSpec {
    pub namespaces: Vec<String>,
    pub min: ResourceVector,
    #[serde(default)]
    pub max: Option<ResourceVector>,
}

impl CompositeQuotaSpec {
    pub fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            min: self.min.clone(),
            max: self.max.clone(),
        }
    }
}

/// Elastic quota shared by several namespaces. Takes precedence over any
/// [`ElasticQuota`] living in one of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositeElasticQuota {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub spec: CompositeQuotaSpec,
    #[serde(default)]
    pub status: QuotaStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CompositeElasticQuota {
    pub fn new(
        namespace: &str,
        name: &str,
        namespaces: &[&str],
        min: ResourceVector,
        max: Option<ResourceVector>,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            spec: CompositeQuotaSpec {
                namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
                min,
                max,
            },
            status: QuotaStatus::default(),
            created_at: Utc::now(),
        }
    }

    pub fn namespace_set(&self) -> BTreeSet<String> {
        self.spec.namespaces.iter().cloned().collect()
    }
}
