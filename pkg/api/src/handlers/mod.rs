pub mod health;
pub mod nodes;
pub mod pdbs;
pub mod pods;
pub mod quotas;
pub mod watch;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use pkg_state::StateStore;
use pkg_types::object::Object;

/// Log a store failure and answer 500.
pub(crate) fn internal_error(context: &str, e: anyhow::Error) -> Response {
    warn!("{}: {}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, context.to_string()).into_response()
}

pub(crate) async fn list_objects<T: Object>(store: &StateStore, namespace: Option<&str>) -> Response {
    match store.list_objects::<T>(namespace).await {
        Ok(objects) => (StatusCode::OK, Json(objects)).into_response(),
        Err(e) => internal_error(&format!("Failed to list {}", T::KIND), e),
    }
}

pub(crate) async fn get_object<T: Object>(store: &StateStore, namespace: &str, name: &str) -> Response {
    match store.get_object::<T>(namespace, name).await {
        Ok(Some(obj)) => (StatusCode::OK, Json(obj)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(&format!("Failed to get {}", T::KIND), e),
    }
}

pub(crate) async fn delete_object<T: Object>(store: &StateStore, namespace: &str, name: &str) -> Response {
    match store.delete_object::<T>(namespace, name).await {
        Ok(true) => {
            info!("Deleted {} {}/{}", T::KIND, namespace, name);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(&format!("Failed to delete {}", T::KIND), e),
    }
}

/// 409 if an object with the same identity already exists.
pub(crate) async fn ensure_absent<T: Object>(store: &StateStore, obj: &T) -> Result<(), Response> {
    match store.get_object::<T>(obj.namespace(), obj.name()).await {
        Ok(None) => Ok(()),
        Ok(Some(_)) => Err((
            StatusCode::CONFLICT,
            format!("{} {} already exists", T::KIND, obj.object_key()),
        )
            .into_response()),
        Err(e) => Err(internal_error(&format!("Failed to get {}", T::KIND), e)),
    }
}

pub(crate) async fn store_object<T: Object>(store: &StateStore, obj: T) -> Response {
    match store.put_object(&obj).await {
        Ok(()) => {
            info!("Created {} {}", T::KIND, obj.object_key());
            (StatusCode::CREATED, Json(obj)).into_response()
        }
        Err(e) => internal_error(&format!("Failed to create {}", T::KIND), e),
    }
}
