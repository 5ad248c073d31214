use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use pkg_types::{Pod, PodPhase};

use super::{delete_object, ensure_absent, get_object, internal_error, list_objects, store_object};
use crate::AppState;

/// Body of `PUT .../pods/{name}/status`.
#[derive(Debug, Deserialize)]
pub struct PodStatusUpdate {
    pub phase: PodPhase,
}

/// POST /api/v1/namespaces/{ns}/pods: new pods wait for the scheduler
/// unless they already name a node.
pub async fn create_pod(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut pod): Json<Pod>,
) -> Response {
    pod.id = Uuid::new_v4().to_string();
    pod.namespace = ns;
    pod.created_at = Utc::now();
    pod.deletion_timestamp = None;
    if !pod.is_assigned() {
        pod.phase = PodPhase::Pending;
    }

    if let Err(resp) = ensure_absent(&state.store, &pod).await {
        return resp;
    }
    store_object(&state.store, pod).await
}

pub async fn list_pods(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> Response {
    list_objects::<Pod>(&state.store, Some(&ns)).await
}

pub async fn get_pod(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    get_object::<Pod>(&state.store, &ns, &name).await
}

pub async fn delete_pod(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    delete_object::<Pod>(&state.store, &ns, &name).await
}

/// PUT /api/v1/namespaces/{ns}/pods/{name}/status: phase transitions
/// reported by the node.
pub async fn update_pod_status(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Json(update): Json<PodStatusUpdate>,
) -> Response {
    let pod = match state.store.get_object::<Pod>(&ns, &name).await {
        Ok(Some(p)) => p,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return internal_error("Failed to get pod", e),
    };
    if update.phase != PodPhase::Pending && !pod.is_assigned() {
        return (
            StatusCode::CONFLICT,
            format!("pod {} is not bound to a node", pod.key()),
        )
            .into_response();
    }

    let mut updated = pod.clone();
    updated.phase = update.phase;
    if update.phase == PodPhase::Running && updated.start_time.is_none() {
        updated.start_time = Some(Utc::now());
    }
    match state.store.patch_object(&pod, &updated).await {
        Ok(Some(stored)) => {
            info!("Pod {} phase {:?} → {:?}", pod.key(), pod.phase, stored.phase);
            (StatusCode::OK, Json(stored)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("Failed to update pod status", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;
    use pkg_types::PodSpec;

    #[tokio::test]
    async fn created_pods_start_pending() {
        let state = test_state();
        let mut pod = Pod::new("ignored", "w", PodSpec::default());
        pod.phase = PodPhase::Running;
        let resp = create_pod(State(state.clone()), AxumPath("team".into()), Json(pod)).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored: Pod = state.store.get_object("team", "w").await.unwrap().unwrap();
        assert_eq!(stored.phase, PodPhase::Pending);
        assert!(!stored.id.is_empty());
    }

    #[tokio::test]
    async fn status_update_requires_binding() {
        let state = test_state();
        let pod = Pod::new("team", "w", PodSpec::default());
        state.store.put_object(&pod).await.unwrap();

        let resp = update_pod_status(
            State(state.clone()),
            AxumPath(("team".into(), "w".into())),
            Json(PodStatusUpdate {
                phase: PodPhase::Running,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let mut bound = pod.clone();
        bound.node_name = Some("n1".into());
        state.store.put_object(&bound).await.unwrap();
        let resp = update_pod_status(
            State(state.clone()),
            AxumPath(("team".into(), "w".into())),
            Json(PodStatusUpdate {
                phase: PodPhase::Running,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let stored: Pod = state.store.get_object("team", "w").await.unwrap().unwrap();
        assert_eq!(stored.phase, PodPhase::Running);
        assert!(stored.start_time.is_some());
    }
}
