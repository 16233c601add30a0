//! Execution result types

use crate::suspension::WaitCondition;
use kiln_types::Value;

/// Result of instruction execution
#[derive(Debug)]
pub(crate) enum ExecutionResult {
    /// Continue to next instruction
    Continue,
    /// Return from function
    Return(Vec<Value>),
    /// A native call is waiting; park the fiber
    Suspend(WaitCondition),
}

/// Where a fiber stopped
#[derive(Debug)]
pub(crate) enum Step {
    Returned(Vec<Value>),
    Suspended(WaitCondition),
}
