//! Bytecode interpreter.
//!
//! A [`Fiber`] is one logical thread of execution: a stack of call frames
//! over a shared [`Context`]. Running a fiber ends in one of three ways:
//! it returns (results type-checked and packed into a [`TypedList`]), it
//! suspends because a native call returned a wait condition, or it fails
//! and unwinds every frame.

use crate::bytecode::{BytecodeModule, FunctionPrototype};
use crate::context::{Context, FunctionRef, ModuleStateRef};
use crate::error::{TrapKind, VmError};
use crate::module::Module;
use crate::native::{Continuation, NativeCall, NativeOutcome};
use crate::opcode::{instruction::*, OpCode};
use crate::signature::Signature;
use crate::suspension::{WaitCondition, WaitResolution};
use kiln_types::sync::Arc;
use kiln_types::{TypedList, Value, ValueType};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

// Module structure
mod execution;
mod frame;
mod ops;
mod result;

// Re-export public types
pub use frame::{CallFrame, RegisterWindow};

use result::{ExecutionResult, Step};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique fiber identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Ready,
    Running,
    Suspended,
    Returned,
    Failed,
}

/// Where a `run` or `resume` left the fiber
#[derive(Debug)]
pub enum FiberStatus {
    Returned(TypedList),
    Suspended(WaitCondition),
}

/// Where the results of a suspended native call go
#[derive(Debug, Clone, Copy)]
enum ResultTarget {
    Registers(u8),
    /// The native function was the fiber's entry point
    Entry,
}

struct PendingCall {
    continuation: Continuation,
    module_index: usize,
    function: String,
    results: Vec<ValueType>,
    target: ResultTarget,
    condition: WaitCondition,
}

/// One logical thread of interpreter control.
pub struct Fiber {
    id: FiberId,
    context: Arc<Context>,
    entry: FunctionRef,
    entry_name: String,
    args: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pending: Option<PendingCall>,
    state: FiberState,
    /// Why a `Failed` fiber stopped
    failure: Option<VmError>,
}

impl Fiber {
    /// Prepare a call of the exported function `module.function`.
    pub fn new(context: &Arc<Context>, function: &str, args: Vec<Value>) -> Result<Self, VmError> {
        let entry = context.lookup_function(function)?;
        Signature::check_values(&entry.signature.params, &args, "argument")?;
        Ok(Self {
            id: FiberId::next(),
            context: context.clone(),
            entry,
            entry_name: function.to_string(),
            args,
            frames: Vec::new(),
            pending: None,
            state: FiberState::Ready,
            failure: None,
        })
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn state(&self) -> FiberState {
        self.state
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Number of live call frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Terminal error of a failed or cancelled fiber
    pub fn failure(&self) -> Option<&VmError> {
        self.failure.as_ref()
    }

    /// Condition the fiber is suspended on
    pub fn pending_condition(&self) -> Option<&WaitCondition> {
        self.pending.as_ref().map(|p| &p.condition)
    }

    /// Start execution. Only valid on a `Ready` fiber.
    pub fn run(&mut self) -> Result<FiberStatus, VmError> {
        if self.state != FiberState::Ready {
            return Err(self.invalid_state("run"));
        }
        self.state = FiberState::Running;
        trace!(fiber = %self.id, function = %self.entry_name, "fiber started");
        let args = std::mem::take(&mut self.args);
        let step = self.start(args);
        self.finish(step)
    }

    /// Continue a suspended fiber with the resolution of its wait.
    ///
    /// The pending continuation produces the call's results, they land in
    /// the caller's result registers and execution continues with the
    /// instruction after the call.
    pub fn resume(&mut self, resolution: WaitResolution) -> Result<FiberStatus, VmError> {
        if self.state != FiberState::Suspended {
            return Err(self.invalid_state("resume"));
        }
        let pending = self
            .pending
            .take()
            .ok_or_else(|| VmError::InvalidState("suspended fiber has no pending call".into()))?;
        self.state = FiberState::Running;
        trace!(fiber = %self.id, ?resolution, "fiber resumed");
        let step = self.complete_pending(pending, resolution);
        self.finish(step)
    }

    /// Abandon a suspended (or never started) fiber, releasing everything
    /// it holds. The pending continuation never runs and every frame
    /// unwinds with [`VmError::Cancelled`]. Later `run` or `resume` calls
    /// report the same failure.
    pub fn cancel(&mut self) -> Result<FiberStatus, VmError> {
        match self.state {
            FiberState::Suspended | FiberState::Ready => {
                self.args.clear();
                self.fail(VmError::Cancelled)
            }
            _ => Err(self.invalid_state("cancel")),
        }
    }

    /// Drive the fiber to completion, blocking the current thread on every
    /// wait.
    pub fn run_to_completion(&mut self) -> Result<TypedList, VmError> {
        let mut status = match self.state {
            FiberState::Suspended => {
                let resolution = self
                    .pending_condition()
                    .map(WaitCondition::wait_blocking)
                    .ok_or_else(|| self.invalid_state("run_to_completion"))?;
                self.resume(resolution)?
            }
            _ => self.run()?,
        };
        loop {
            match status {
                FiberStatus::Returned(list) => return Ok(list),
                FiberStatus::Suspended(condition) => {
                    let resolution = condition.wait_blocking();
                    status = self.resume(resolution)?;
                }
            }
        }
    }

    fn invalid_state(&self, operation: &str) -> VmError {
        if let (FiberState::Failed, Some(err)) = (self.state, &self.failure) {
            return err.clone();
        }
        VmError::InvalidState(format!(
            "cannot {} {} in state {:?}",
            operation, self.id, self.state
        ))
    }

    fn start(&mut self, args: Vec<Value>) -> Result<Step, VmError> {
        let entry = self.entry.clone();
        let module = self.context.loaded(entry.module_index)?.module.clone();
        match module {
            Module::Bytecode(module) => {
                let function = module
                    .function(entry.ordinal)
                    .cloned()
                    .ok_or(TrapKind::InvalidFunction(entry.ordinal))?;
                let frame = CallFrame::new(function, module, entry.module_index, args, None)?;
                self.frames.push(frame);
                self.execute()
            }
            Module::Native(_) => {
                match self.call_native(entry.module_index, entry.ordinal, args, ResultTarget::Entry)? {
                    Some(values) => Ok(Step::Returned(values)),
                    None => Ok(Step::Suspended(self.pending_wait()?)),
                }
            }
        }
    }

    fn complete_pending(
        &mut self,
        pending: PendingCall,
        resolution: WaitResolution,
    ) -> Result<Step, VmError> {
        let context = self.context.clone();
        let state = context.loaded(pending.module_index)?.state.clone();
        let call = NativeCall {
            registry: context.registry(),
            state: &state,
            function: &pending.function,
        };
        let values = (pending.continuation)(&call, resolution)?;
        Signature::check_values(&pending.results, &values, "result")?;
        match pending.target {
            ResultTarget::Entry => Ok(Step::Returned(values)),
            ResultTarget::Registers(base) => {
                self.current_frame_mut()?.registers.write(base, values)?;
                self.execute()
            }
        }
    }

    /// Main execution loop
    fn execute(&mut self) -> Result<Step, VmError> {
        loop {
            let frame = self.current_frame_mut()?;

            // Fetch instruction; running off the end returns nothing
            let instruction = match frame.fetch() {
                Some(inst) => inst,
                None => {
                    if let Some(step) = self.do_return(Vec::new())? {
                        return Ok(step);
                    }
                    continue;
                }
            };

            // Decode and dispatch
            let opcode_byte = decode_opcode(instruction);
            let opcode = OpCode::from_u8(opcode_byte).ok_or(TrapKind::InvalidOpcode(opcode_byte))?;

            match self.execute_instruction(opcode, instruction)? {
                ExecutionResult::Continue => {}
                ExecutionResult::Return(values) => {
                    if let Some(step) = self.do_return(values)? {
                        return Ok(step);
                    }
                }
                ExecutionResult::Suspend(condition) => return Ok(Step::Suspended(condition)),
            }
        }
    }

    /// Execute a single instruction
    fn execute_instruction(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        match opcode {
            OpCode::Nop => Ok(ExecutionResult::Continue),

            // Constants, moves, globals
            OpCode::LoadConst
            | OpCode::LoadImm
            | OpCode::LoadNull
            | OpCode::Move
            | OpCode::GlobalLoad
            | OpCode::GlobalStore
            | OpCode::LoadRodata => self.execute_variables(opcode, instruction),

            // Arithmetic, bitwise, casts
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::Neg
            | OpCode::DivU
            | OpCode::RemU
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Not
            | OpCode::Shl
            | OpCode::ShrS
            | OpCode::ShrU
            | OpCode::Cast
            | OpCode::CastU => self.execute_arithmetic(opcode, instruction),

            // Comparison
            OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::LtU
            | OpCode::RefEq
            | OpCode::IsNull => self.execute_comparison(opcode, instruction),

            // Control flow
            OpCode::Jump
            | OpCode::BranchIf
            | OpCode::BranchUnless
            | OpCode::Return
            | OpCode::Fail => self.execute_control(opcode, instruction),

            // Calls
            OpCode::Call | OpCode::CallImport => self.execute_functions(opcode, instruction),

            // Lists
            OpCode::ListAlloc
            | OpCode::ListSize
            | OpCode::ListResize
            | OpCode::ListGet
            | OpCode::ListSet
            | OpCode::ListPush => self.execute_lists(opcode, instruction),
        }
    }

    // ===== Helper methods =====

    /// Get current call frame
    pub(crate) fn current_frame(&self) -> Result<&CallFrame, VmError> {
        self.frames
            .last()
            .ok_or_else(|| VmError::InvalidState("no active frame".into()))
    }

    /// Get current call frame (mutable)
    pub(crate) fn current_frame_mut(&mut self) -> Result<&mut CallFrame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::InvalidState("no active frame".into()))
    }

    /// Get register from current frame
    pub(crate) fn get_register(&self, idx: u8) -> Result<&Value, VmError> {
        self.current_frame()?.registers.get(idx)
    }

    /// Set register in current frame
    pub(crate) fn set_register(&mut self, idx: u8, value: Value) -> Result<(), VmError> {
        self.current_frame_mut()?.registers.set(idx, value)
    }

    /// State of the current frame's module
    pub(crate) fn module_state(&self) -> Result<ModuleStateRef, VmError> {
        let index = self.current_frame()?.module_index;
        Ok(self.context.loaded(index)?.state.clone())
    }

    /// Push a bytecode frame whose arguments sit in R[base..] of the caller
    pub(crate) fn push_call(
        &mut self,
        function: Arc<FunctionPrototype>,
        module: Arc<BytecodeModule>,
        module_index: usize,
        base: u8,
    ) -> Result<ExecutionResult, VmError> {
        let depth = self.context.config().max_call_depth;
        if self.frames.len() >= depth {
            return Err(TrapKind::StackOverflow { depth }.into());
        }
        let args = self
            .current_frame()?
            .registers
            .slice(base, function.signature.params.len())?;
        Signature::check_values(&function.signature.params, &args, "argument")?;
        trace!(
            fiber = %self.id,
            function = %function.name,
            depth = self.frames.len() + 1,
            "call"
        );
        let frame = CallFrame::new(function, module, module_index, args, Some(base))?;
        self.frames.push(frame);
        Ok(ExecutionResult::Continue)
    }

    /// Invoke a native export from bytecode; results land in R[base..]
    pub(crate) fn call_native_import(
        &mut self,
        module_index: usize,
        ordinal: usize,
        base: u8,
        arg_count: usize,
    ) -> Result<ExecutionResult, VmError> {
        let args = self.current_frame()?.registers.slice(base, arg_count)?;
        match self.call_native(module_index, ordinal, args, ResultTarget::Registers(base))? {
            Some(values) => {
                self.current_frame_mut()?.registers.write(base, values)?;
                Ok(ExecutionResult::Continue)
            }
            None => Ok(ExecutionResult::Suspend(self.pending_wait()?)),
        }
    }

    /// `None` means the call is now pending
    fn call_native(
        &mut self,
        module_index: usize,
        ordinal: usize,
        args: Vec<Value>,
        target: ResultTarget,
    ) -> Result<Option<Vec<Value>>, VmError> {
        let context = self.context.clone();
        let loaded = context.loaded(module_index)?;
        let native = match &loaded.module {
            Module::Native(native) => native.clone(),
            Module::Bytecode(_) => {
                return Err(VmError::InvalidState(format!(
                    "module '{}' is not native",
                    loaded.module.name()
                )))
            }
        };
        let function = native
            .function(ordinal)
            .ok_or(TrapKind::InvalidFunction(ordinal))?;
        Signature::check_values(&function.signature.params, &args, "argument")?;
        trace!(
            fiber = %self.id,
            module = %native.name(),
            function = %function.name,
            "native call"
        );

        let call = NativeCall {
            registry: context.registry(),
            state: &loaded.state,
            function: &function.name,
        };
        match (function.func)(&call, &args)? {
            NativeOutcome::Return(values) => {
                Signature::check_values(&function.signature.results, &values, "result")?;
                Ok(Some(values))
            }
            NativeOutcome::Await(pending) => {
                trace!(fiber = %self.id, function = %function.name, "native call pending");
                self.pending = Some(PendingCall {
                    continuation: pending.continuation,
                    module_index,
                    function: function.name.clone(),
                    results: function.signature.results.clone(),
                    target,
                    condition: pending.condition,
                });
                Ok(None)
            }
        }
    }

    fn pending_wait(&self) -> Result<WaitCondition, VmError> {
        self.pending
            .as_ref()
            .map(|p| p.condition.clone())
            .ok_or_else(|| VmError::InvalidState("no pending call".into()))
    }

    /// Pop the current frame; `Some` once the entry frame has returned
    fn do_return(&mut self, values: Vec<Value>) -> Result<Option<Step>, VmError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::InvalidState("return without a frame".into()))?;
        Signature::check_values(&frame.function.signature.results, &values, "result")?;

        match (self.frames.last_mut(), frame.return_base) {
            (None, _) => Ok(Some(Step::Returned(values))),
            (Some(caller), Some(base)) => {
                caller.registers.write(base, values)?;
                Ok(None)
            }
            (Some(_), None) => Err(VmError::InvalidState(
                "nested frame without a result base".into(),
            )),
        }
    }

    fn finish(&mut self, step: Result<Step, VmError>) -> Result<FiberStatus, VmError> {
        match step {
            Ok(Step::Returned(values)) => {
                self.frames.clear();
                if let Err(err) =
                    Signature::check_values(&self.entry.signature.results, &values, "result")
                {
                    return self.fail(err);
                }
                self.state = FiberState::Returned;
                trace!(fiber = %self.id, results = values.len(), "fiber returned");
                Ok(FiberStatus::Returned(TypedList::from_values(values)))
            }
            Ok(Step::Suspended(condition)) => {
                self.state = FiberState::Suspended;
                trace!(fiber = %self.id, depth = self.frames.len(), "fiber suspended");
                Ok(FiberStatus::Suspended(condition))
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: VmError) -> Result<FiberStatus, VmError> {
        self.frames.clear();
        self.pending = None;
        self.state = FiberState::Failed;
        self.failure = Some(err.clone());
        debug!(fiber = %self.id, error = %err, "fiber failed");
        Err(err)
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("entry", &self.entry_name)
            .field("state", &self.state)
            .field("depth", &self.frames.len())
            .finish()
    }
}
