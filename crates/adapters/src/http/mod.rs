pub mod error;
pub mod health_handler;
pub mod metrics_handler;
pub mod offload_handler;
pub mod router;
pub mod server;
pub mod state;
pub mod topology_handler;
