//! Call frame implementation

use crate::bytecode::{BytecodeModule, FunctionPrototype, MAX_REGISTERS};
use crate::error::{TrapKind, VmError};
use kiln_types::sync::Arc;
use kiln_types::Value;

/// Register window for a call frame
#[derive(Debug, Clone)]
pub struct RegisterWindow {
    registers: Vec<Value>,
}

impl RegisterWindow {
    /// Create a register window of `size` registers, all `i32 0`
    pub fn new(size: usize) -> Self {
        Self {
            registers: vec![Value::I32(0); size.min(MAX_REGISTERS)],
        }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Get register value
    #[inline]
    pub fn get(&self, idx: u8) -> Result<&Value, VmError> {
        self.registers
            .get(idx as usize)
            .ok_or_else(|| self.out_of_bounds(idx as usize))
    }

    /// Set register value, dropping (and so releasing) the previous one
    #[inline]
    pub fn set(&mut self, idx: u8, value: Value) -> Result<(), VmError> {
        let count = self.registers.len();
        match self.registers.get_mut(idx as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(TrapKind::RegisterOutOfBounds {
                register: idx as usize,
                count,
            }
            .into()),
        }
    }

    /// Clone `count` registers starting at `base`
    pub fn slice(&self, base: u8, count: usize) -> Result<Vec<Value>, VmError> {
        let start = base as usize;
        self.registers
            .get(start..start + count)
            .map(|values| values.to_vec())
            .ok_or_else(|| self.out_of_bounds(start + count.saturating_sub(1)))
    }

    /// Write `values` into consecutive registers starting at `base`
    pub fn write(&mut self, base: u8, values: Vec<Value>) -> Result<(), VmError> {
        let start = base as usize;
        if start + values.len() > self.registers.len() {
            return Err(self.out_of_bounds(start + values.len().saturating_sub(1)));
        }
        for (slot, value) in self.registers[start..].iter_mut().zip(values) {
            *slot = value;
        }
        Ok(())
    }

    fn out_of_bounds(&self, register: usize) -> VmError {
        TrapKind::RegisterOutOfBounds {
            register,
            count: self.registers.len(),
        }
        .into()
    }
}

/// Call frame (function activation record)
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Function being executed
    pub function: Arc<FunctionPrototype>,

    /// Module the function belongs to (constants, imports, rodata)
    pub module: Arc<BytecodeModule>,

    /// Index of that module within the context
    pub module_index: usize,

    /// Instruction pointer (current position in code)
    pub ip: usize,

    /// Register window for this frame
    pub registers: RegisterWindow,

    /// First result register in the caller's window
    pub return_base: Option<u8>,
}

impl CallFrame {
    /// Create a frame with `args` in registers `0..args.len()`
    pub fn new(
        function: Arc<FunctionPrototype>,
        module: Arc<BytecodeModule>,
        module_index: usize,
        args: Vec<Value>,
        return_base: Option<u8>,
    ) -> Result<Self, VmError> {
        let mut registers = RegisterWindow::new(function.register_count as usize);
        registers.write(0, args)?;
        Ok(Self {
            function,
            module,
            module_index,
            ip: 0,
            registers,
            return_base,
        })
    }

    /// Fetch next instruction
    #[inline]
    pub fn fetch(&mut self) -> Option<u32> {
        let instruction = self.function.get_instruction(self.ip)?;
        self.ip += 1;
        Some(instruction)
    }

    /// Relative jump from the instruction after the current one
    #[inline]
    pub fn jump(&mut self, offset: i16) {
        self.ip = (self.ip as isize + offset as isize) as usize;
    }
}
