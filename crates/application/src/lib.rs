#![forbid(unsafe_code)]

pub mod forwarding_context;
pub mod ipv4_rule_service_impl;
pub mod ipv6_rule_service_impl;
pub mod offload_coordinator;
pub mod polling_scheduler;
