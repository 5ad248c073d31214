use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::info;

use pkg_types::{CompositeElasticQuota, ElasticQuota, QuotaStatus};

use super::{delete_object, ensure_absent, get_object, internal_error, list_objects, store_object};
use crate::AppState;
use crate::admission::{AdmissionResponse, validate_composite_quota, validate_elastic_quota};

fn denied(verdict: AdmissionResponse) -> Response {
    info!(
        "Admission denied: {}",
        verdict.reason.as_deref().unwrap_or("no reason")
    );
    (StatusCode::FORBIDDEN, Json(verdict)).into_response()
}

// ============================================================
// Admission review
// ============================================================

/// POST /api/v1/admission/elasticquotas: validate without persisting.
pub async fn review_elastic_quota(
    State(state): State<AppState>,
    Json(quota): Json<ElasticQuota>,
) -> Response {
    match validate_elastic_quota(&state.store, &quota).await {
        Ok(verdict) => (StatusCode::OK, Json(verdict)).into_response(),
        Err(e) => internal_error("Failed to validate ElasticQuota", e),
    }
}

/// POST /api/v1/admission/compositeelasticquotas
pub async fn review_composite_quota(
    State(state): State<AppState>,
    Json(composite): Json<CompositeElasticQuota>,
) -> Response {
    match validate_composite_quota(&state.store, &composite).await {
        Ok(verdict) => (StatusCode::OK, Json(verdict)).into_response(),
        Err(e) => internal_error("Failed to validate CompositeElasticQuota", e),
    }
}

// ============================================================
// ElasticQuotas
// ============================================================

pub async fn create_elastic_quota(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut quota): Json<ElasticQuota>,
) -> Response {
    quota.namespace = ns;
    quota.status = QuotaStatus::default();
    quota.created_at = Utc::now();

    if let Err(resp) = ensure_absent(&state.store, &quota).await {
        return resp;
    }
    match validate_elastic_quota(&state.store, &quota).await {
        Ok(verdict) if !verdict.allowed => denied(verdict),
        Ok(_) => store_object(&state.store, quota).await,
        Err(e) => internal_error("Failed to validate ElasticQuota", e),
    }
}

pub async fn list_elastic_quotas(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> Response {
    list_objects::<ElasticQuota>(&state.store, Some(&ns)).await
}

pub async fn get_elastic_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    get_object::<ElasticQuota>(&state.store, &ns, &name).await
}

/// PUT replaces the spec; status is owned by the reconciler.
pub async fn update_elastic_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Json(body): Json<ElasticQuota>,
) -> Response {
    let existing = match state.store.get_object::<ElasticQuota>(&ns, &name).await {
        Ok(Some(q)) => q,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return internal_error("Failed to get ElasticQuota", e),
    };
    let mut updated = existing.clone();
    updated.spec = body.spec;

    match validate_elastic_quota(&state.store, &updated).await {
        Ok(verdict) if !verdict.allowed => return denied(verdict),
        Ok(_) => {}
        Err(e) => return internal_error("Failed to validate ElasticQuota", e),
    }
    match state.store.patch_object(&existing, &updated).await {
        Ok(Some(stored)) => {
            info!("Updated ElasticQuota {}/{}", ns, name);
            (StatusCode::OK, Json(stored)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("Failed to update ElasticQuota", e),
    }
}

pub async fn delete_elastic_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    delete_object::<ElasticQuota>(&state.store, &ns, &name).await
}

// ============================================================
// CompositeElasticQuotas
// ============================================================

pub async fn create_composite_quota(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut composite): Json<CompositeElasticQuota>,
) -> Response {
    composite.namespace = ns;
    composite.status = QuotaStatus::default();
    composite.created_at = Utc::now();

    if let Err(resp) = ensure_absent(&state.store, &composite).await {
        return resp;
    }
    match validate_composite_quota(&state.store, &composite).await {
        Ok(verdict) if !verdict.allowed => denied(verdict),
        Ok(_) => store_object(&state.store, composite).await,
        Err(e) => internal_error("Failed to validate CompositeElasticQuota", e),
    }
}

pub async fn list_composite_quotas(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> Response {
    list_objects::<CompositeElasticQuota>(&state.store, Some(&ns)).await
}

pub async fn get_composite_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    get_object::<CompositeElasticQuota>(&state.store, &ns, &name).await
}

pub async fn update_composite_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Json(body): Json<CompositeElasticQuota>,
) -> Response {
    let existing = match state.store.get_object::<CompositeElasticQuota>(&ns, &name).await {
        Ok(Some(q)) => q,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return internal_error("Failed to get CompositeElasticQuota", e),
    };
    let mut updated = existing.clone();
    updated.spec = body.spec;

    match validate_composite_quota(&state.store, &updated).await {
        Ok(verdict) if !verdict.allowed => return denied(verdict),
        Ok(_) => {}
        Err(e) => return internal_error("Failed to validate CompositeElasticQuota", e),
    }
    match state.store.patch_object(&existing, &updated).await {
        Ok(Some(stored)) => {
            info!("Updated CompositeElasticQuota {}/{}", ns, name);
            (StatusCode::OK, Json(stored)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("Failed to update CompositeElasticQuota", e),
    }
}

pub async fn delete_composite_quota(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    delete_object::<CompositeElasticQuota>(&state.store, &ns, &name).await
}
