use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::AppState;
use crate::handlers::{health, nodes, pdbs, pods, quotas, watch as watch_handlers};
use crate::request_id::request_id_middleware;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        // admission review
        .route(
            "/api/v1/admission/elasticquotas",
            post(quotas::review_elastic_quota),
        )
        .route(
            "/api/v1/admission/compositeelasticquotas",
            post(quotas::review_composite_quota),
        )
        // quotas
        .route(
            "/api/v1/namespaces/{ns}/elasticquotas",
            post(quotas::create_elastic_quota).get(quotas::list_elastic_quotas),
        )
        .route(
            "/api/v1/namespaces/{ns}/elasticquotas/{name}",
            get(quotas::get_elastic_quota)
                .put(quotas::update_elastic_quota)
                .delete(quotas::delete_elastic_quota),
        )
        .route(
            "/api/v1/namespaces/{ns}/compositeelasticquotas",
            post(quotas::create_composite_quota).get(quotas::list_composite_quotas),
        )
        .route(
            "/api/v1/namespaces/{ns}/compositeelasticquotas/{name}",
            get(quotas::get_composite_quota)
                .put(quotas::update_composite_quota)
                .delete(quotas::delete_composite_quota),
        )
        // pods
        .route(
            "/api/v1/namespaces/{ns}/pods",
            post(pods::create_pod).get(pods::list_pods),
        )
        .route(
            "/api/v1/namespaces/{ns}/pods/{name}",
            get(pods::get_pod).delete(pods::delete_pod),
        )
        .route(
            "/api/v1/namespaces/{ns}/pods/{name}/status",
            put(pods::update_pod_status),
        )
        // disruption budgets
        .route(
            "/api/v1/namespaces/{ns}/poddisruptionbudgets",
            post(pdbs::create_pdb).get(pdbs::list_pdbs),
        )
        .route(
            "/api/v1/namespaces/{ns}/poddisruptionbudgets/{name}",
            axum::routing::delete(pdbs::delete_pdb),
        )
        // nodes
        .route(
            "/api/v1/nodes",
            post(nodes::register_node).get(nodes::list_nodes),
        )
        .route(
            "/api/v1/nodes/{name}",
            get(nodes::get_node).delete(nodes::delete_node),
        )
        .route("/api/v1/watch", get(watch_handlers::watch_events))
        .route_layer(middleware::from_fn(request_id_middleware));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .merge(api_routes)
        .with_state(state)
}

/// Serve the API until `shutdown` flips to true.
pub async fn start_server(
    config: ServerConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(state);

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    info!("API server stopped");
    Ok(())
}
