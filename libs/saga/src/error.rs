//! Error types for the saga engine.

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while building, resuming or ticking a sequence.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The durable store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No command record exists for the workflow.
    #[error("command record not found: {0}")]
    RecordNotFound(String),

    /// A command record already exists for a workflow being started.
    #[error("command record already exists: {0}")]
    AlreadyExists(String),

    /// A stored field could not be interpreted.
    #[error("corrupt field {field} in record {key}: {reason}")]
    CorruptRecord {
        key: String,
        field: String,
        reason: String,
    },

    /// The persisted cursor lies outside `[-1, N]`.
    #[error("cursor {cursor} outside [-1, {steps}]")]
    InvariantViolation { cursor: isize, steps: usize },

    /// Scratchpad (de)serialization failed.
    #[error("scratchpad serialization error: {0}")]
    Scratchpad(#[from] serde_json::Error),
}

impl SagaError {
    pub(crate) fn corrupt(key: &str, field: &str, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            key: key.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}
