use thiserror::Error;

/// Errors raised by the step engine itself.
///
/// Domain failures raised inside a task travel through [`FlowError::Task`] untouched, so the
/// caller can downcast them back to its own error type.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error(transparent)]
    Task(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
