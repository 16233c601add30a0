//! HAL error type

use thiserror::Error;

/// Errors reported by HAL objects and devices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// Allocation or queue capacity exhausted
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Object is in the wrong state for the request (e.g. recording ended)
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A timeline semaphore was failed; carries the failure message
    #[error("semaphore failed: {0}")]
    Aborted(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Backend-reported failure
    #[error("device error: {0}")]
    Device(String),
}

impl HalError {
    /// Integer status code surfaced to bytecode
    pub fn status_code(&self) -> i32 {
        match self {
            HalError::InvalidArgument(_) => 3,
            HalError::DeadlineExceeded => 4,
            HalError::ResourceExhausted(_) => 8,
            HalError::FailedPrecondition(_) => 9,
            HalError::Aborted(_) => 10,
            HalError::OutOfRange(_) => 11,
            HalError::Unimplemented(_) => 12,
            HalError::Device(_) => 13,
        }
    }
}

pub type HalResult<T> = Result<T, HalError>;
