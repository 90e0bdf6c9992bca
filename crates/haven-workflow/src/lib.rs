//! Workflow orchestration: directed-acyclic step graphs with typed
//! inputs/outputs, per-step retry policies, compensation on terminal
//! failure, and warm-kv persistence for resumability.

pub mod engine;
pub mod persist;
pub mod retry;
pub mod types;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("execution not found: {id}")]
    NotFound { id: String },

    #[error("workflow definition invalid: {0}")]
    InvalidDefinition(String),

    /// Reading a persisted execution failed — safe to retry.
    #[error("storage read failed: {0}")]
    StorageRead(String),

    /// Writing an execution snapshot failed — surfaced, never auto-retried.
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<WorkflowError> for haven_core::HavenError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound { id } => haven_core::HavenError::WorkflowFailed {
                execution_id: id,
                reason: "execution not found".to_string(),
            },
            WorkflowError::InvalidDefinition(msg) => haven_core::HavenError::InvalidRequest(msg),
            WorkflowError::StorageRead(msg) => haven_core::HavenError::StorageRead(msg),
            WorkflowError::StorageWrite(msg) => haven_core::HavenError::StorageWrite(msg),
            WorkflowError::Internal(msg) => haven_core::HavenError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

pub use engine::WorkflowEngine;
pub use types::{
    CompensationHandler, ExecutionRecord, ExecutionStatus, RetryPolicy, RetryStrategy, StepDef,
    StepError, StepHandler, StepInput, StepState, StepStatus, WorkflowContext, WorkflowDefinition,
};
