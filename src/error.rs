//! Error types for the advisor core.
//!
//! Library components return [`AdvisorError`]; the binaries wrap it in
//! `anyhow` for context.

use std::path::PathBuf;

/// Errors surfaced by the pattern advisor.
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error("invalid requirement: {reason}")]
    InvalidRequirement { reason: String },

    #[error("session id must not be empty")]
    InvalidSession,

    #[error("pattern {path:?} failed validation: {reason}")]
    PatternValidation { path: PathBuf, reason: String },

    #[error("pattern creation blocked: {reason}")]
    CreationBlocked { reason: String },

    #[error("could not allocate an identifier for prefix {prefix}")]
    IdAllocation { prefix: String },

    #[error("pattern {id} not found")]
    PatternNotFound { id: String },

    #[error("embedding provider failed: {reason}")]
    Provider { reason: String },

    #[error("decision log write failed: {0}")]
    DecisionLog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl AdvisorError {
    pub fn invalid_requirement(reason: impl Into<String>) -> Self {
        Self::InvalidRequirement {
            reason: reason.into(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::CreationBlocked {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdvisorError>;
