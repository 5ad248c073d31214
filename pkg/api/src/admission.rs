//! Validating admission for quota objects.
//!
//! Both kinds are checked on create and update. An object never conflicts
//! with itself, so updates compare against every *other* quota.

use serde::{Deserialize, Serialize};

use pkg_state::StateStore;
use pkg_types::object::Object;
use pkg_types::validate::{validate_min, validate_name, validate_namespaces, validate_quota_limits};
use pkg_types::{CompositeElasticQuota, ElasticQuota};

/// Verdict returned by the validation endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdmissionResponse {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// A simple quota is denied when its namespace already has another simple
/// quota, or when a composite quota governs the namespace.
pub async fn validate_elastic_quota(
    store: &StateStore,
    quota: &ElasticQuota,
) -> anyhow::Result<AdmissionResponse> {
    if let Err(e) = validate_name(&quota.name)
        .and_then(|_| validate_min(&quota.spec.min))
        .and_then(|_| validate_quota_limits(&quota.spec))
    {
        return Ok(AdmissionResponse::deny(e.to_string()));
    }

    let existing = store
        .list_objects::<ElasticQuota>(Some(&quota.namespace))
        .await?;
    if let Some(other) = existing.iter().find(|q| q.name != quota.name) {
        return Ok(AdmissionResponse::deny(format!(
            "only one ElasticQuota is allowed per namespace: {} already has {}",
            quota.namespace, other.name
        )));
    }

    let composites = store.list_objects::<CompositeElasticQuota>(None).await?;
    if let Some(owner) = composites
        .iter()
        .find(|c| c.spec.namespaces.contains(&quota.namespace))
    {
        return Ok(AdmissionResponse::deny(format!(
            "namespace {} is already governed by CompositeElasticQuota {}",
            quota.namespace,
            owner.object_key()
        )));
    }
    Ok(AdmissionResponse::allow())
}

/// A composite quota is denied when any of its namespaces is claimed by
/// another composite quota.
pub async fn validate_composite_quota(
    store: &StateStore,
    composite: &CompositeElasticQuota,
) -> anyhow::Result<AdmissionResponse> {
    if let Err(e) = validate_name(&composite.name)
        .and_then(|_| validate_namespaces(&composite.spec.namespaces))
        .and_then(|_| validate_min(&composite.spec.min))
        .and_then(|_| validate_quota_limits(&composite.spec.limits()))
    {
        return Ok(AdmissionResponse::deny(e.to_string()));
    }

    let own = composite.object_key();
    let mine = composite.namespace_set();
    for other in store.list_objects::<CompositeElasticQuota>(None).await? {
        if other.object_key() == own {
            continue;
        }
        if let Some(ns) = other.namespace_set().intersection(&mine).next() {
            return Ok(AdmissionResponse::deny(format!(
                "namespace {} is already governed by CompositeElasticQuota {}",
                ns,
                other.object_key()
            )));
        }
    }
    Ok(AdmissionResponse::allow())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::{ResourceName, ResourceVector};

    fn cpu(v: i64) -> ResourceVector {
        ResourceVector::new().with(ResourceName::Cpu, v)
    }

    #[tokio::test]
    async fn second_simple_quota_in_namespace_is_denied() {
        let store = StateStore::in_memory();
        let first = ElasticQuota::new("team", "first", cpu(100), None);
        assert!(validate_elastic_quota(&store, &first).await.unwrap().allowed);
        store.put_object(&first).await.unwrap();

        // updating the same quota is fine
        assert!(validate_elastic_quota(&store, &first).await.unwrap().allowed);

        let second = ElasticQuota::new("team", "second", cpu(100), None);
        let verdict = validate_elastic_quota(&store, &second).await.unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("already has first"));
    }

    #[tokio::test]
    async fn simple_quota_in_composite_namespace_is_denied() {
        let store = StateStore::in_memory();
        store
            .put_object(&CompositeElasticQuota::new("admin", "shared", &["a", "b"], cpu(100), None))
            .await
            .unwrap();

        let verdict = validate_elastic_quota(&store, &ElasticQuota::new("b", "q", cpu(10), None))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(
            validate_elastic_quota(&store, &ElasticQuota::new("c", "q", cpu(10), None))
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn min_above_max_is_denied() {
        let store = StateStore::in_memory();
        let quota = ElasticQuota::new("team", "q", cpu(200), Some(cpu(100)));
        let verdict = validate_elastic_quota(&store, &quota).await.unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("min quota must be less than or equal to max"));
    }

    #[tokio::test]
    async fn invalid_name_is_denied() {
        let store = StateStore::in_memory();
        let quota = ElasticQuota::new("team", "Bad_Name", cpu(100), None);
        assert!(!validate_elastic_quota(&store, &quota).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn overlapping_composites_are_denied_on_create_and_update() {
        let store = StateStore::in_memory();
        let first = CompositeElasticQuota::new("admin", "first", &["a", "b"], cpu(100), None);
        store.put_object(&first).await.unwrap();

        let overlapping = CompositeElasticQuota::new("admin", "second", &["b", "c"], cpu(100), None);
        let verdict = validate_composite_quota(&store, &overlapping).await.unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("namespace b"));

        let disjoint = CompositeElasticQuota::new("admin", "second", &["c"], cpu(100), None);
        assert!(validate_composite_quota(&store, &disjoint).await.unwrap().allowed);

        // an update of `first` does not collide with itself
        let mut widened = first.clone();
        widened.spec.namespaces.push("d".into());
        assert!(validate_composite_quota(&store, &widened).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn composite_with_duplicate_namespaces_is_denied() {
        let store = StateStore::in_memory();
        let composite = CompositeElasticQuota::new("admin", "dup", &["a", "a"], cpu(100), None);
        assert!(!validate_composite_quota(&store, &composite).await.unwrap().allowed);
    }
}
