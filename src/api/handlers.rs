use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::credential::{Category, CredentialView};
use crate::models::mapping::{FunctionMapping, NewMapping, Route};
use crate::models::rate_limit::RateLimitStatus;
use crate::models::usage::UsageStats;
use crate::registry::usage::window_start;
use crate::registry::validator::{self, ValidationResult};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct UpsertCredentialRequest {
    pub service_name: String,
    /// Display name ("Text Generation") or slug ("text-generation").
    pub category: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Deserialize)]
pub struct ValidateCredentialRequest {
    pub service_name: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Deserialize)]
pub struct SetPrimaryRequest {
    pub category: String,
}

#[derive(Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct ResolveParams {
    pub function_name: String,
}

#[derive(Deserialize)]
pub struct ConfigureRateLimitRequest {
    pub service_name: String,
    pub request_limit: i64,
    pub reset_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct RecordUsageParams {
    pub count: Option<i64>,
}

#[derive(Deserialize)]
pub struct UsageStatsParams {
    /// Only entries from the last `days` days; all entries when absent.
    pub days: Option<i64>,
}

#[derive(Deserialize)]
pub struct DispatchRequest {
    pub function_name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize)]
pub struct UsageStatsResponse {
    pub since: Option<chrono::DateTime<Utc>>,
    #[serde(flatten)]
    pub stats: UsageStats,
}

fn parse_category(raw: &str) -> Result<Category, AppError> {
    raw.parse::<Category>().map_err(AppError::InvalidInput)
}

// ── Credentials ──────────────────────────────────────────────

/// GET /api/v1/credentials: redacted credentials grouped by category
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<Category, Vec<CredentialView>>>, AppError> {
    Ok(Json(state.registry.credentials.list_by_category().await?))
}

/// POST /api/v1/credentials: create or replace the key for (service, category)
pub async fn upsert_credential(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpsertCredentialRequest>,
) -> Result<Json<CredentialView>, AppError> {
    let category = parse_category(&payload.category)?;
    let view = state
        .registry
        .credentials
        .upsert_credential(
            &payload.service_name,
            category,
            &payload.api_key,
            payload.base_url.as_deref(),
        )
        .await?;
    Ok(Json(view))
}

/// POST /api/v1/credentials/validate: dry run of the key format checks
pub async fn validate_credential(
    Json(payload): Json<ValidateCredentialRequest>,
) -> Json<ValidationResult> {
    Json(validator::validate(
        &payload.service_name,
        &payload.api_key,
        payload.base_url.as_deref(),
    ))
}

pub async fn set_primary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetPrimaryRequest>,
) -> Result<Json<CredentialView>, AppError> {
    let category = parse_category(&payload.category)?;
    Ok(Json(state.registry.credentials.set_primary(id, category).await?))
}

pub async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<CredentialView>, AppError> {
    Ok(Json(state.registry.credentials.set_active(id, payload.is_active).await?))
}

pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.registry.credentials.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Function mappings ────────────────────────────────────────

pub async fn list_mappings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FunctionMapping>>, AppError> {
    Ok(Json(state.registry.mappings.list().await?))
}

/// PUT /api/v1/mappings: create or replace the route for a function
pub async fn upsert_mapping(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewMapping>,
) -> Result<Json<FunctionMapping>, AppError> {
    Ok(Json(state.registry.mappings.upsert(payload).await?))
}

pub async fn resolve_mapping(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<Route>, AppError> {
    Ok(Json(state.registry.mappings.resolve(&params.function_name).await?))
}

pub async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.registry.mappings.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Rate limits ──────────────────────────────────────────────

pub async fn list_rate_limits(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RateLimitStatus>>, AppError> {
    Ok(Json(state.registry.rate_limits.list().await?))
}

pub async fn configure_rate_limit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfigureRateLimitRequest>,
) -> Result<Json<RateLimitStatus>, AppError> {
    let status = state
        .registry
        .rate_limits
        .configure(&payload.service_name, payload.request_limit, payload.reset_date)
        .await?;
    Ok(Json(status))
}

/// POST /api/v1/rate-limits/:service/usage?count=N: count requests made outside dispatch
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(params): Query<RecordUsageParams>,
) -> Result<StatusCode, AppError> {
    state
        .registry
        .rate_limits
        .record_usage(&service, params.count.unwrap_or(1))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_rate_limit(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<RateLimitStatus>, AppError> {
    Ok(Json(state.registry.rate_limits.reset(&service).await?))
}

// ── Usage & dispatch ─────────────────────────────────────────

pub async fn usage_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UsageStatsParams>,
) -> Result<Json<UsageStatsResponse>, AppError> {
    let since = params.days.map(window_start).transpose()?;
    let stats = state.registry.usage.aggregate(since).await?;
    Ok(Json(UsageStatsResponse { since, stats }))
}

/// POST /api/v1/dispatch: run a function through its mapped services.
/// A failed outcome is returned with 502 and the same body shape.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DispatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .dispatcher
        .dispatch(&payload.function_name, &payload.payload)
        .await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)))
}
