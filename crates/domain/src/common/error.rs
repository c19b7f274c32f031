use thiserror::Error;

use crate::conntrack::error::ConntrackParseError;
use crate::stats::error::StatsError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("rule table unavailable: {0}")]
    TableUnavailable(&'static str),

    #[error("rule store error: {0}")]
    RuleStore(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl From<StatsError> for DomainError {
    fn from(err: StatsError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<ConntrackParseError> for DomainError {
    fn from(err: ConntrackParseError) -> Self {
        Self::EngineError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_error_maps_to_invalid_argument() {
        let err: DomainError = StatsError::InvalidQuota(-7).into();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
        assert!(err.to_string().contains("-7"));
    }

    #[test]
    fn table_unavailable_names_the_table() {
        let err = DomainError::TableUnavailable("stats");
        assert_eq!(err.to_string(), "rule table unavailable: stats");
    }
}
