#![deny(unsafe_code)]

pub mod alert;
pub mod clock;
pub mod conntrack;
pub mod ebpf;
pub mod http;
pub mod netd;
