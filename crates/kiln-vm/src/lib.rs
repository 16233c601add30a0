//! Kiln Virtual Machine
//!
//! This crate loads bytecode modules, links them with native modules inside
//! a context, and runs their exported functions on fibers. A fiber that
//! calls a native function which has to wait (a semaphore, a fence, a
//! deadline) suspends with a wait condition instead of blocking; the host
//! resumes it later through the suspension controller or one of the
//! drivers.
//!
//! # Modules
//!
//! - `opcode`: Instruction set and instruction word encoding
//! - `bytecode`: In-memory module format
//! - `binary`: Module serialization
//! - `builder`: Programmatic module assembly
//! - `verify`: Static checks run on every loaded module
//! - `native`: Native module ABI
//! - `context`: Instances, contexts and import linking
//! - `vm`: Fibers and the interpreter loop
//! - `suspension`: Parking and resuming suspended fibers

#![allow(clippy::result_large_err)]

pub mod binary;
pub mod builder;
pub mod bytecode;
pub mod bytecode_debug;
pub mod config;
pub mod context;
pub mod error;
pub mod module;
pub mod native;
pub mod opcode;
pub mod signature;
pub mod suspension;
pub mod verify;
pub mod vm;

// Re-export main types
pub use builder::{FunctionBuilder, ModuleBuilder};
pub use bytecode::{BytecodeModule, Constant};
pub use bytecode_debug::{disassemble_function, disassemble_module};
pub use config::VmConfig;
pub use context::{Context, FunctionRef, Instance, ModuleStateRef};
pub use error::{TrapKind, VmError};
pub use module::Module;
pub use native::{NativeCall, NativeModule, NativeOutcome};
pub use opcode::OpCode;
pub use signature::Signature;
pub use suspension::{
    run_all_async, run_async, HostScheduler, Outcome, Resumed, SuspensionController,
    SuspensionToken, WaitCondition, WaitResolution,
};
pub use vm::{Fiber, FiberId, FiberState, FiberStatus};

#[cfg(test)]
mod tests;
