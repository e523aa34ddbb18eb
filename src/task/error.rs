use thiserror::Error;

use crate::producer::ProducerError;

use super::TaskPhase;

/// Errors raised by task registry and generation operations.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// No record exists for the id (never created, or already terminal).
    #[error("Task {0} not found or already completed")]
    TaskNotFound(String),

    /// A consumer is already reading this task's stream.
    #[error("Task {0} is already being streamed")]
    DuplicateStream(String),

    /// The request was malformed or exceeded configured limits.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation is not valid in the task's current phase.
    #[error("Cannot {action} a task in phase {phase:?}")]
    InvalidTransition { action: &'static str, phase: TaskPhase },

    /// The producer failed for a reason other than an abort.
    #[error("Producer failure: {0}")]
    Producer(#[from] ProducerError),
}
