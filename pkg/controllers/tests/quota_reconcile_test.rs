//! Quota reconcilers driven end-to-end through an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pkg_constants::labels::{CAPACITY_IN_QUOTA, CAPACITY_OVER_QUOTA, LABEL_CAPACITY_INFO};
use pkg_constants::resources::{RESOURCE_GPU_MEMORY, RESOURCE_NVIDIA_GPU};
use pkg_controllers::{
    CompositeElasticQuotaReconciler, Controller, ElasticQuotaReconciler, Reconciler,
};
use pkg_gpu::ResourceCalculator;
use pkg_metrics::MetricsRegistry;
use pkg_state::StateStore;
use pkg_types::object::Object;
use pkg_types::{
    CompositeElasticQuota, ContainerSpec, ElasticQuota, Pod, PodPhase, PodSpec, ResourceName,
    ResourceVector,
};
use tokio::sync::watch;

fn cpu(v: i64) -> ResourceVector {
    ResourceVector::new().with(ResourceName::Cpu, v)
}

fn metrics() -> Arc<MetricsRegistry> {
    Arc::new(MetricsRegistry::elastiq())
}

async fn run_pod(store: &StateStore, ns: &str, name: &str, requests: ResourceVector, age_secs: i64) -> Pod {
    let mut pod = Pod::new(
        ns,
        name,
        PodSpec {
            containers: vec![ContainerSpec::new("main", requests)],
            ..Default::default()
        },
    );
    pod.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
    pod.node_name = Some("node-0".into());
    pod.phase = PodPhase::Running;
    store.put_object(&pod).await.unwrap();
    pod
}

async fn label(store: &StateStore, ns: &str, name: &str) -> Option<String> {
    let pod: Pod = store.get_object(ns, name).await.unwrap()?;
    pod.labels.get(LABEL_CAPACITY_INFO).cloned()
}

#[tokio::test]
async fn admitted_pod_is_labelled_in_quota() {
    let store = StateStore::in_memory();
    let calc = ResourceCalculator::new(8);
    let quota = ElasticQuota::new(
        "team",
        "quota",
        cpu(1000).with(RESOURCE_GPU_MEMORY, 16),
        Some(cpu(2000).with(RESOURCE_GPU_MEMORY, 32)),
    );
    store.put_object(&quota).await.unwrap();
    run_pod(&store, "team", "trainer", cpu(500).with(RESOURCE_NVIDIA_GPU, 1), 0).await;

    let reconciler = ElasticQuotaReconciler::new("elasticquota-controller", store.clone(), calc, metrics());
    reconciler.reconcile(&quota.object_key()).await.unwrap();

    assert_eq!(label(&store, "team", "trainer").await.as_deref(), Some(CAPACITY_IN_QUOTA));
    let quota: ElasticQuota = store.get_object("team", "quota").await.unwrap().unwrap();
    assert_eq!(quota.status.used.milli_cpu(), 500);
    assert_eq!(quota.status.used.scalar(RESOURCE_GPU_MEMORY), 8);
    assert!(!quota.status.used.contains(&ResourceName::scalar(RESOURCE_NVIDIA_GPU)));
}

#[tokio::test]
async fn shrinking_min_relabels_the_younger_pod() {
    let store = StateStore::in_memory();
    let calc = ResourceCalculator::new(8);
    let two_gpus = || ResourceVector::new().with(RESOURCE_NVIDIA_GPU, 2);
    let quota = ElasticQuota::new(
        "team",
        "quota",
        ResourceVector::new().with(RESOURCE_GPU_MEMORY, 32),
        None,
    );
    store.put_object(&quota).await.unwrap();
    run_pod(&store, "team", "w1", two_gpus(), 100).await;
    run_pod(&store, "team", "w2", two_gpus(), 10).await;

    let reconciler = ElasticQuotaReconciler::new("elasticquota-controller", store.clone(), calc, metrics());
    reconciler.reconcile(&quota.object_key()).await.unwrap();
    assert_eq!(label(&store, "team", "w1").await.as_deref(), Some(CAPACITY_IN_QUOTA));
    assert_eq!(label(&store, "team", "w2").await.as_deref(), Some(CAPACITY_IN_QUOTA));

    let observed: ElasticQuota = store.get_object("team", "quota").await.unwrap().unwrap();
    assert_eq!(observed.status.used.scalar(RESOURCE_GPU_MEMORY), 32);
    let mut shrunk = observed.clone();
    shrunk.spec.min = ResourceVector::new().with(RESOURCE_GPU_MEMORY, 16);
    store.patch_object(&observed, &shrunk).await.unwrap();

    reconciler.reconcile(&quota.object_key()).await.unwrap();
    assert_eq!(label(&store, "team", "w1").await.as_deref(), Some(CAPACITY_IN_QUOTA));
    assert_eq!(label(&store, "team", "w2").await.as_deref(), Some(CAPACITY_OVER_QUOTA));
}

#[tokio::test]
async fn composite_supersedes_simple_quota() {
    let store = StateStore::in_memory();
    let calc = ResourceCalculator::new(8);
    let simple = ElasticQuota::new("n", "simple", cpu(1000), None);
    store.put_object(&simple).await.unwrap();
    run_pod(&store, "n", "old", cpu(600), 100).await;
    run_pod(&store, "m", "young", cpu(600), 10).await;

    let simple_reconciler = ElasticQuotaReconciler::new("elasticquota-controller", store.clone(), calc, metrics());
    simple_reconciler.reconcile(&simple.object_key()).await.unwrap();
    assert_eq!(label(&store, "n", "old").await.as_deref(), Some(CAPACITY_IN_QUOTA));
    assert_eq!(label(&store, "m", "young").await, None);

    let composite = CompositeElasticQuota::new("admin", "shared", &["n", "m"], cpu(1000), None);
    store.put_object(&composite).await.unwrap();
    let reconciler = CompositeElasticQuotaReconciler::new(
        "compositeelasticquota-controller",
        store.clone(),
        calc,
        metrics(),
    );
    reconciler.reconcile(&composite.object_key()).await.unwrap();

    let gone: Option<ElasticQuota> = store.get_object("n", "simple").await.unwrap();
    assert!(gone.is_none());
    assert_eq!(label(&store, "n", "old").await.as_deref(), Some(CAPACITY_IN_QUOTA));
    assert_eq!(label(&store, "m", "young").await.as_deref(), Some(CAPACITY_OVER_QUOTA));
    let composite: CompositeElasticQuota = store.get_object("admin", "shared").await.unwrap().unwrap();
    assert_eq!(composite.status.used.milli_cpu(), 1200);
}

#[tokio::test]
async fn finished_pod_frees_room_for_its_peer() {
    let store = StateStore::in_memory();
    let calc = ResourceCalculator::new(8);
    let quota = ElasticQuota::new("team", "quota", cpu(1000), None);
    store.put_object(&quota).await.unwrap();
    run_pod(&store, "team", "w1", cpu(600), 100).await;
    run_pod(&store, "team", "w2", cpu(600), 10).await;

    let reconciler = ElasticQuotaReconciler::new("elasticquota-controller", store.clone(), calc, metrics());
    reconciler.reconcile(&quota.object_key()).await.unwrap();
    assert_eq!(label(&store, "team", "w2").await.as_deref(), Some(CAPACITY_OVER_QUOTA));

    let mut rx = store.event_log.subscribe();
    let observed: Pod = store.get_object("team", "w1").await.unwrap().unwrap();
    let mut done = observed.clone();
    done.phase = PodPhase::Succeeded;
    store.patch_object(&observed, &done).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(
        reconciler.keys_for_event(&event).await.unwrap(),
        vec![quota.object_key()]
    );
    reconciler.reconcile(&quota.object_key()).await.unwrap();

    assert_eq!(label(&store, "team", "w2").await.as_deref(), Some(CAPACITY_IN_QUOTA));
    let quota: ElasticQuota = store.get_object("team", "quota").await.unwrap().unwrap();
    assert_eq!(quota.status.used.milli_cpu(), 600);
}

#[tokio::test]
async fn running_controller_labels_new_pods() {
    let store = StateStore::in_memory();
    let calc = ResourceCalculator::new(8);
    let controller = Controller::new(
        store.clone(),
        ElasticQuotaReconciler::new("elasticquota-controller", store.clone(), calc, metrics()),
        metrics(),
        Duration::from_secs(3600),
    );
    let (tx, rx) = watch::channel(false);
    let handle = controller.start(rx);

    store
        .put_object(&ElasticQuota::new("team", "quota", cpu(1000), None))
        .await
        .unwrap();
    let pod = run_pod(&store, "team", "w", cpu(100), 0).await;
    // creates are ignored; a phase flip into Running enqueues the quota
    let mut pending = pod.clone();
    pending.phase = PodPhase::Pending;
    store.put_object(&pending).await.unwrap();
    store.put_object(&pod).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while label(&store, "team", "w").await.is_none() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(label(&store, "team", "w").await.as_deref(), Some(CAPACITY_IN_QUOTA));

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
