use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub offload_enabled: bool,
}

/// Liveness check: 200 while the process is running.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        offload_enabled: state.coordinator.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure::metrics::AgentMetrics;

    #[tokio::test]
    async fn healthz_reports_ok_without_coordinator() {
        let state = Arc::new(AppState::new(Arc::new(AgentMetrics::new()), None));
        let Json(body) = healthz(State(state)).await;
        assert_eq!(body.status, "ok");
        assert!(!body.offload_enabled);
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }
}
