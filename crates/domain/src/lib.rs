#![forbid(unsafe_code)]

pub mod client;
pub mod common;
pub mod conntrack;
pub mod ipv4;
pub mod ipv6;
pub mod stats;
pub mod upstream;
