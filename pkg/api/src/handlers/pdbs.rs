use axum::{
    Json,
    extract::{Path as AxumPath, State},
    response::Response,
};
use chrono::Utc;

use pkg_types::PodDisruptionBudget;

use super::{delete_object, ensure_absent, list_objects, store_object};
use crate::AppState;

pub async fn create_pdb(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut pdb): Json<PodDisruptionBudget>,
) -> Response {
    pdb.namespace = ns;
    pdb.created_at = Utc::now();
    if let Err(resp) = ensure_absent(&state.store, &pdb).await {
        return resp;
    }
    store_object(&state.store, pdb).await
}

pub async fn list_pdbs(State(state): State<AppState>, AxumPath(ns): AxumPath<String>) -> Response {
    list_objects::<PodDisruptionBudget>(&state.store, Some(&ns)).await
}

pub async fn delete_pdb(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    delete_object::<PodDisruptionBudget>(&state.store, &ns, &name).await
}
