use std::sync::Arc;

use application::offload_coordinator::CoordinatorSnapshot;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LimitRequest {
    pub iface: String,
    /// Bytes, or `-1` for unlimited.
    pub quota_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub quota_bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct PollingResponse {
    pub running: bool,
    pub interval_ms: u64,
}

/// Diagnostic snapshot of the offload coordinator.
pub async fn get_offload(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CoordinatorSnapshot>, ApiError> {
    let snapshot = state.coordinator()?.dump().await?;
    Ok(Json(snapshot))
}

pub async fn put_limit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LimitRequest>,
) -> Result<StatusCode, ApiError> {
    if req.iface.is_empty() {
        return Err(ApiError::BadRequest {
            code: "VALIDATION_ERROR",
            message: "iface must not be empty".to_string(),
        });
    }
    state.coordinator()?
        .set_limit(&req.iface, req.quota_bytes)
        .await?;
    tracing::info!(iface = %req.iface, quota_bytes = req.quota_bytes, "data limit set via API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_alert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AlertRequest>,
) -> Result<StatusCode, ApiError> {
    state.coordinator()?.set_alert(req.quota_bytes).await?;
    tracing::info!(quota_bytes = req.quota_bytes, "alert quota set via API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_polling(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PollingResponse>, ApiError> {
    let snapshot = state.coordinator()?.dump().await?;
    Ok(Json(PollingResponse {
        running: snapshot.polling,
        interval_ms: snapshot.poll_interval_ms,
    }))
}

pub async fn start_polling(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.coordinator()?.start_polling().await?;
    tracing::info!("stats polling started via API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_polling(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.coordinator()?.stop_polling().await?;
    tracing::info!("stats polling stopped via API");
    Ok(StatusCode::NO_CONTENT)
}
