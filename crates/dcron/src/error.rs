use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] dcron_schedule::ParseError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("job name {0:?} already exists")]
    DuplicateName(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    OutOfRange(String),

    #[error("coordination store: {0}")]
    Store(String),

    /// CAS-create lost: the key is already held. Expected outcome during
    /// mutex contention, never surfaced to HTTP callers as such.
    #[error("key already exists")]
    KeyExists,

    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("peer sync failed: {0}")]
    PeerSync(String),

    #[error("job runner: {0}")]
    Runner(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// HTTP status for the façade: caller mistakes are 4xx, everything an
    /// operator has to look at is 5xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Parse(_)
            | Error::Validation(_)
            | Error::DuplicateName(_)
            | Error::NotFound(_)
            | Error::OutOfRange(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
