//! Error taxonomy for the grading core.
//!
//! Lookup misses and admission rejections are user-correctable and surfaced
//! verbatim; `Unavailable` marks sandbox infrastructure failures that are
//! unrelated to submission correctness and must never be reported as WRONG.

use thiserror::Error;

/// Errors produced by the file-backed task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("topic not found by id")]
    NotFoundTopic,

    #[error("task not found by id")]
    NotFoundTask,

    #[error("malformed topic index: {0}")]
    MalformedIndex(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a check request can terminate with.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("topic not found by id")]
    NotFoundTopic,

    #[error("task not found by id")]
    NotFoundTask,

    #[error("rate limit exceeded: {max} per {window_secs}s")]
    RateLimited { max: u32, window_secs: u64 },

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] std::io::Error),
}

impl From<StoreError> for CheckError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFoundTopic => CheckError::NotFoundTopic,
            StoreError::NotFoundTask => CheckError::NotFoundTask,
            StoreError::Io(e) => CheckError::Internal(e),
            StoreError::MalformedIndex(msg) => {
                CheckError::Internal(std::io::Error::other(msg))
            }
        }
    }
}
