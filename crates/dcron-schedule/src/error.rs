use thiserror::Error;

/// Rejection of a cron expression. Every variant names the offending field
/// and the sub-expression so callers can surface the error verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty spec string")]
    EmptySpec,

    #[error("expected 6 fields (sec min hour dom month dow), got {0}")]
    FieldCount(usize),

    #[error("{field}: failed to parse int from {expr:?}")]
    InvalidInt { field: &'static str, expr: String },

    #[error("{field}: unknown name {expr:?}")]
    UnknownName { field: &'static str, expr: String },

    #[error("{field}: too many hyphens: {expr:?}")]
    TooManyHyphens { field: &'static str, expr: String },

    #[error("{field}: too many slashes: {expr:?}")]
    TooManySlashes { field: &'static str, expr: String },

    #[error("{field}: beginning of range ({start}) below minimum ({min}): {expr:?}")]
    BelowMinimum {
        field: &'static str,
        start: u32,
        min: u32,
        expr: String,
    },

    #[error("{field}: end of range ({end}) above maximum ({max}): {expr:?}")]
    AboveMaximum {
        field: &'static str,
        end: u32,
        max: u32,
        expr: String,
    },

    #[error("{field}: beginning of range ({start}) beyond end of range ({end}): {expr:?}")]
    InvertedRange {
        field: &'static str,
        start: u32,
        end: u32,
        expr: String,
    },

    #[error("{field}: step of range must be a positive number: {expr:?}")]
    ZeroStep { field: &'static str, expr: String },
}
