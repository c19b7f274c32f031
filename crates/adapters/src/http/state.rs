use std::sync::Arc;
use std::time::Instant;

use application::offload_coordinator::CoordinatorHandle;
use infrastructure::metrics::AgentMetrics;

use super::error::ApiError;

/// Shared application state for the HTTP server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<AgentMetrics>,
    /// `None` when offload is disabled in the configuration.
    pub coordinator: Option<CoordinatorHandle>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(metrics: Arc<AgentMetrics>, coordinator: Option<CoordinatorHandle>) -> Self {
        Self {
            metrics,
            coordinator,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// The coordinator handle, or 503 when offload is disabled.
    pub fn coordinator(&self) -> Result<&CoordinatorHandle, ApiError> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable {
                message: "offload is disabled".to_string(),
            })
    }
}
