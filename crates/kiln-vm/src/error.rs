//! Error types for the loader and interpreter

use kiln_hal::HalError;
use kiln_types::{ListError, RegistryError};
use thiserror::Error;

/// Runtime traps: the program did something it may not do.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrapKind {
    /// Integer division or remainder by zero
    #[error("integer division by zero")]
    DivisionByZero,

    #[error("register R{register} outside window of {count}")]
    RegisterOutOfBounds { register: usize, count: usize },

    #[error("invalid constant index: {0}")]
    InvalidConstant(usize),

    #[error("invalid function ordinal: {0}")]
    InvalidFunction(usize),

    #[error("invalid global slot: {0}")]
    InvalidGlobal(usize),

    /// List, buffer or rodata index outside its bounds
    #[error("index {index} out of bounds (size {size})")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("call depth exceeded {depth}")]
    StackOverflow { depth: usize },

    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Handle released (or never valid) at the time of use
    #[error("use of released resource {0}")]
    UseAfterRelease(String),

    #[error("null reference")]
    NullReference,

    /// An optional import that did not resolve was called
    #[error("unresolved import {0}")]
    UnresolvedImport(String),

    /// Explicit `fail` instruction
    #[error("module failure {code}: {message}")]
    ModuleFailure { code: i32, message: String },
}

/// VM errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Malformed module, failed verification, or failed linking
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Value or resource of the wrong type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// List element read through the wrong accessor
    #[error("kind mismatch at list index {index}: expected {expected}, got {actual}")]
    KindMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("trap: {0}")]
    Trap(#[from] TrapKind),

    /// The fiber was cancelled while suspended
    #[error("cancelled")]
    Cancelled,

    #[error("device error: {0}")]
    DeviceError(#[from] HalError),

    /// API misuse, e.g. resuming a fiber that is not suspended
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl VmError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        VmError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<RegistryError> for VmError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::TypeMismatch { expected, actual } => {
                VmError::type_mismatch(expected.to_string(), actual.to_string())
            }
            RegistryError::InvalidHandle(handle) => {
                VmError::Trap(TrapKind::UseAfterRelease(handle.to_string()))
            }
            RegistryError::Exhausted { limit } => {
                VmError::ResourceExhausted(format!("registry limit {} reached", limit))
            }
        }
    }
}

impl From<ListError> for VmError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::KindMismatch {
                index,
                expected,
                actual,
            } => VmError::KindMismatch {
                index,
                expected,
                actual: actual.to_string(),
            },
            ListError::OutOfBounds { index, size } => VmError::Trap(TrapKind::IndexOutOfBounds {
                index: index as i64,
                size,
            }),
            ListError::CapacityExceeded { requested, limit } => VmError::ResourceExhausted(
                format!("list capacity {} exceeds limit {}", requested, limit),
            ),
        }
    }
}
