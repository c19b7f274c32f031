use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("invalid quota {0}: must be >= 0 or the unlimited sentinel -1")]
    InvalidQuota(i64),

    #[error("interface name must not be empty")]
    EmptyInterfaceName,
}
