use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use pkg_constants::state::EVENT_LOG_CAPACITY;
use pkg_types::object::{Object, cluster_key, kind_prefix, namespaced_key};

use crate::backend::{KvBackend, MemoryBackend, SlateBackend};
use crate::patch::{apply_merge_patch, create_merge_patch, is_empty_patch};
use crate::watch::{EventLog, EventType};

/// Object store shared by the API server, the reconcilers and the scheduler.
///
/// Every write goes through here so that it is recorded in the event log
/// together with the value it replaced.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn KvBackend>,
    pub event_log: EventLog,
    /// Serializes read-modify-write sequences so events see consistent prev values.
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open (or create) a SlateDB-backed store rooted at `path`.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        let backend = SlateBackend::open(path).await?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        info!("State store ready (backend={})", backend.name());
        Self {
            backend,
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    // --- Raw access ---

    pub async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let prev = self.backend.get(key).await?;
        self.backend.put(key, value).await?;
        let event_type = if prev.is_some() {
            EventType::Modified
        } else {
            EventType::Added
        };
        self.event_log
            .emit(event_type, key.to_string(), prev, Some(value.to_vec()))
            .await;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.backend.get(key).await
    }

    /// Delete a key. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(prev) = self.backend.get(key).await? else {
            return Ok(false);
        };
        self.backend.delete(key).await?;
        self.event_log
            .emit(EventType::Deleted, key.to_string(), Some(prev), None)
            .await;
        Ok(true)
    }

    pub async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        self.backend.list_prefix(prefix).await
    }

    // --- Typed access ---

    pub async fn get_object<T: Object>(&self, namespace: &str, name: &str) -> anyhow::Result<Option<T>> {
        let key = object_key::<T>(namespace, name);
        match self.backend.get(&key).await? {
            Some(bytes) => {
                let obj = serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", key, e))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// List objects of a kind, optionally within one namespace.
    /// Entries that fail to decode are logged and skipped.
    pub async fn list_objects<T: Object>(&self, namespace: Option<&str>) -> anyhow::Result<Vec<T>> {
        let prefix = kind_prefix(T::KIND, namespace);
        let entries = self.backend.list_prefix(&prefix).await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            match serde_json::from_slice::<T>(&bytes) {
                Ok(obj) => out.push(obj),
                Err(e) => warn!("Skipping undecodable object {}: {}", key, e),
            }
        }
        Ok(out)
    }

    pub async fn put_object<T: Object>(&self, obj: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(obj)?;
        self.put(&obj.storage_key(), &bytes).await
    }

    pub async fn delete_object<T: Object>(&self, namespace: &str, name: &str) -> anyhow::Result<bool> {
        self.delete(&object_key::<T>(namespace, name)).await
    }

    /// Merge-patch the stored object with the difference between `original`
    /// (the copy the caller observed) and `modified`.
    ///
    /// Returns the object as stored after the patch, or `None` if it no longer
    /// exists. An empty difference does not write.
    pub async fn patch_object<T: Object>(&self, original: &T, modified: &T) -> anyhow::Result<Option<T>> {
        let patch = create_merge_patch(
            &serde_json::to_value(original)?,
            &serde_json::to_value(modified)?,
        );
        let key = original.storage_key();

        let _guard = self.write_lock.lock().await;
        let Some(current_bytes) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let mut current: serde_json::Value = serde_json::from_slice(&current_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", key, e))?;
        if is_empty_patch(&patch) {
            return Ok(Some(serde_json::from_value(current)?));
        }
        apply_merge_patch(&mut current, &patch);
        let patched: T = serde_json::from_value(current)
            .map_err(|e| anyhow::anyhow!("Patched {} is invalid: {}", key, e))?;
        let bytes = serde_json::to_vec(&patched)?;
        self.backend.put(&key, &bytes).await?;
        self.event_log
            .emit(EventType::Modified, key, Some(current_bytes), Some(bytes))
            .await;
        Ok(Some(patched))
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.backend.close().await
    }
}

fn object_key<T: Object>(namespace: &str, name: &str) -> String {
    if T::NAMESPACED {
        namespaced_key(T::KIND, namespace, name)
    } else {
        cluster_key(T::KIND, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::labels::LABEL_CAPACITY_INFO;
    use pkg_types::{ElasticQuota, Node, Pod, PodPhase, PodSpec, ResourceName, ResourceVector};

    #[tokio::test]
    async fn typed_round_trip_and_listing() {
        let store = StateStore::in_memory();
        let q1 = ElasticQuota::new("team-a", "quota", ResourceVector::new().with(ResourceName::Cpu, 1000), None);
        let q2 = ElasticQuota::new("team-b", "quota", ResourceVector::new().with(ResourceName::Cpu, 500), None);
        store.put_object(&q1).await.unwrap();
        store.put_object(&q2).await.unwrap();
        store.put_object(&Node::new("n1", ResourceVector::new())).await.unwrap();

        let got: ElasticQuota = store.get_object("team-a", "quota").await.unwrap().unwrap();
        assert_eq!(got, q1);
        let all: Vec<ElasticQuota> = store.list_objects(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let in_b: Vec<ElasticQuota> = store.list_objects(Some("team-b")).await.unwrap();
        assert_eq!(in_b, vec![q2]);
        let node: Option<Node> = store.get_object("", "n1").await.unwrap();
        assert!(node.is_some());

        assert!(store.delete_object::<ElasticQuota>("team-a", "quota").await.unwrap());
        assert!(!store.delete_object::<ElasticQuota>("team-a", "quota").await.unwrap());
    }

    #[tokio::test]
    async fn writes_emit_events_with_previous_value() {
        let store = StateStore::in_memory();
        let mut rx = store.event_log.subscribe();
        let mut pod = Pod::new("ml", "trainer", PodSpec::default());
        store.put_object(&pod).await.unwrap();
        pod.phase = PodPhase::Running;
        store.put_object(&pod).await.unwrap();
        store.delete_object::<Pod>("ml", "trainer").await.unwrap();

        let added = rx.recv().await.unwrap();
        assert_eq!(added.event_type, EventType::Added);
        assert_eq!(added.kind(), Some("pods"));
        let modified = rx.recv().await.unwrap();
        assert_eq!(modified.event_type, EventType::Modified);
        let prev: Pod = modified.decode_prev().unwrap();
        let new: Pod = modified.decode_value().unwrap();
        assert_eq!(prev.phase, PodPhase::Pending);
        assert_eq!(new.phase, PodPhase::Running);
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.event_type, EventType::Deleted);
        assert!(deleted.value.is_none());
    }

    #[tokio::test]
    async fn patch_applies_to_current_copy() {
        let store = StateStore::in_memory();
        let pod = Pod::new("ml", "trainer", PodSpec::default());
        store.put_object(&pod).await.unwrap();

        // phase moves on after the reconciler observed the pod
        let mut running = pod.clone();
        running.phase = PodPhase::Running;
        store.put_object(&running).await.unwrap();

        let mut labelled = pod.clone();
        labelled
            .labels
            .insert(LABEL_CAPACITY_INFO.to_string(), "in-quota".to_string());
        let patched = store.patch_object(&pod, &labelled).await.unwrap().unwrap();
        assert_eq!(patched.phase, PodPhase::Running);
        assert_eq!(patched.labels.get(LABEL_CAPACITY_INFO).unwrap(), "in-quota");

        let seq = store.event_log.current_seq().await;
        store.patch_object(&patched, &patched).await.unwrap();
        assert_eq!(store.event_log.current_seq().await, seq);
    }

    #[tokio::test]
    async fn patch_of_missing_object_is_none() {
        let store = StateStore::in_memory();
        let pod = Pod::new("ml", "ghost", PodSpec::default());
        let mut modified = pod.clone();
        modified.phase = PodPhase::Failed;
        assert!(store.patch_object(&pod, &modified).await.unwrap().is_none());
    }
}
