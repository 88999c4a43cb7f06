//! Error kinds for the kernel.
//!
//! The request path never surfaces a bot-detection error to the response:
//! callers of [`Orchestrator::evaluate`]
//! get a neutral [`crate::orchestrator::Verdict`] instead of a `Result::Err`.
//! `CoreError` exists for the collaborator-facing APIs (policy registration,
//! persistence, configuration) where a caller-visible failure is correct.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown policy `{0}` referenced, falling back to default")]
    UnknownPolicy(String),

    #[error("invalid time window `{0}`: {1}")]
    InvalidTimeWindow(String, String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("dispatcher queue overflow, dropped oldest item")]
    DispatcherOverflow,

    #[error("external lookup failed: {0}")]
    ExternalLookup(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
