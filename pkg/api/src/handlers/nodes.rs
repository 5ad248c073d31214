use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::info;

use pkg_types::Node;

use super::{delete_object, get_object, internal_error, list_objects};
use crate::AppState;

/// PUT-like register: a node re-registering replaces its previous record.
pub async fn register_node(State(state): State<AppState>, Json(mut node): Json<Node>) -> Response {
    if let Err(e) = pkg_types::validate::validate_name(&node.name) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    node.registered_at = Utc::now();
    match state.store.put_object(&node).await {
        Ok(()) => {
            info!("Registered node {} (allocatable={})", node.name, node.allocatable);
            (StatusCode::CREATED, Json(node)).into_response()
        }
        Err(e) => internal_error("Failed to register node", e),
    }
}

pub async fn list_nodes(State(state): State<AppState>) -> Response {
    list_objects::<Node>(&state.store, None).await
}

pub async fn get_node(State(state): State<AppState>, AxumPath(name): AxumPath<String>) -> Response {
    get_object::<Node>(&state.store, "", &name).await
}

pub async fn delete_node(State(state): State<AppState>, AxumPath(name): AxumPath<String>) -> Response {
    delete_object::<Node>(&state.store, "", &name).await
}
