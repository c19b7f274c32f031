use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConntrackParseError {
    #[error("empty conntrack event line")]
    Empty,

    #[error("unknown conntrack message type: {0}")]
    UnknownMessage(String),

    #[error("conntrack event is missing {0}")]
    MissingField(&'static str),

    #[error("invalid conntrack field {field}={value}")]
    InvalidField { field: &'static str, value: String },
}
