use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the admin API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/credentials",
            get(handlers::list_credentials).post(handlers::upsert_credential),
        )
        .route("/credentials/validate", post(handlers::validate_credential))
        .route("/credentials/:id", delete(handlers::delete_credential))
        .route("/credentials/:id/primary", post(handlers::set_primary))
        .route("/credentials/:id/active", put(handlers::set_active))
        .route(
            "/mappings",
            get(handlers::list_mappings).put(handlers::upsert_mapping),
        )
        .route("/mappings/resolve", get(handlers::resolve_mapping))
        .route("/mappings/:id", delete(handlers::delete_mapping))
        .route(
            "/rate-limits",
            get(handlers::list_rate_limits).put(handlers::configure_rate_limit),
        )
        .route("/rate-limits/:service/usage", post(handlers::record_usage))
        .route("/rate-limits/:service/reset", post(handlers::reset_rate_limit))
        .route("/usage/stats", get(handlers::usage_stats))
        .route("/dispatch", post(handlers::dispatch))
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

/// Full application: `/healthz` plus the admin API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the configured admin key.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if k == state.config.admin_key() => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
