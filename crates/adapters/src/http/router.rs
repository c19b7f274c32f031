use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};

use super::health_handler::healthz;
use super::metrics_handler::metrics;
use super::offload_handler::{
    get_offload, get_polling, put_alert, put_limit, start_polling, stop_polling,
};
use super::state::AppState;
use super::topology_handler::{
    delete_client, delete_clients, delete_ipv6_rule, delete_ipv6_rules, delete_upstream,
    post_client, post_ipv6_rule, put_ipv6_rules_upstream, put_upstream,
};

/// Build the agent's HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/offload", get(get_offload))
        .route("/offload/limit", put(put_limit))
        .route("/offload/alert", put(put_alert))
        .route(
            "/offload/polling",
            get(get_polling).put(start_polling).delete(stop_polling),
        )
        .route("/offload/upstream", put(put_upstream).delete(delete_upstream))
        .route("/offload/clients", post(post_client).delete(delete_client))
        .route("/offload/clients/{downstream}", delete(delete_clients))
        .route("/offload/ipv6-rules", post(post_ipv6_rule).delete(delete_ipv6_rule))
        .route("/offload/ipv6-rules/{downstream}", delete(delete_ipv6_rules))
        .route(
            "/offload/ipv6-rules/{downstream}/upstream",
            put(put_ipv6_rules_upstream),
        )
        .with_state(state)
}
