//! # Flow Construction Errors
//!
//! One error type shared by every component of the orchestration core. The
//! variants follow the error taxonomy surfaced to API callers; `code()` gives
//! the stable identifier the HTTP layer reports.

use crate::constants::{LockKind, ResourceType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// Malformed input, e.g. mismatched list lengths or out-of-range values
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A referenced resource, listener or rule does not exist
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// The same physical instance is targeted twice within one cloud call
    #[error("Record duplicated: {0}")]
    RecordDuplicated(String),

    /// The resource exists but is not in the expected relational state
    #[error("Record not in updatable state: {0}")]
    RecordNotUpdate(String),

    /// The resource is already owned by another flow
    #[error(
        "Resource busy: {resource_type} {resource_id} is locked by flow {owner_flow_id} ({lock_kind})"
    )]
    ResourceBusy {
        resource_id: String,
        resource_type: ResourceType,
        owner_flow_id: i64,
        lock_kind: LockKind,
    },

    /// A cloud call reported that some of its sub-items failed
    #[error("Partially failed ({succeeded} succeeded, {failed} failed): {message}")]
    PartialFailed {
        succeeded: usize,
        failed: usize,
        message: String,
    },

    /// Storage-layer failure or deadline expiry
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FlowError {
    /// Stable snake_case code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InvalidParameter(_) => "invalid_parameter",
            FlowError::RecordNotFound(_) => "record_not_found",
            FlowError::RecordDuplicated(_) => "record_duplicated",
            FlowError::RecordNotUpdate(_) => "record_not_update",
            FlowError::ResourceBusy { .. } => "resource_busy",
            FlowError::PartialFailed { .. } => "partial_failed",
            FlowError::Aborted(_) => "aborted",
            FlowError::Configuration(_) => "configuration_error",
        }
    }

    /// Errors raised before any record is written
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidParameter(_)
                | FlowError::RecordNotFound(_)
                | FlowError::RecordDuplicated(_)
                | FlowError::RecordNotUpdate(_)
                | FlowError::ResourceBusy { .. }
        )
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => FlowError::RecordNotFound("row not found".to_string()),
            other => FlowError::Aborted(format!("storage failure: {other}")),
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Aborted(format!("payload encoding failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
