//! Arithmetic, bitwise and cast instruction execution

use crate::error::VmError;
use crate::opcode::{instruction::*, OpCode};
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;
use crate::vm::Fiber;

impl Fiber {
    /// Execute arithmetic instructions
    pub(crate) fn execute_arithmetic(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        let a = decode_a(instruction);
        let b = decode_b(instruction);
        let c = decode_c(instruction);

        let result = match opcode {
            OpCode::Neg => ValueOperations::neg_value(self.get_register(b)?)?,
            OpCode::Not => ValueOperations::not_value(self.get_register(b)?)?,
            OpCode::Cast => ValueOperations::cast(self.get_register(b)?, c, false)?,
            OpCode::CastU => ValueOperations::cast(self.get_register(b)?, c, true)?,
            _ => {
                let left = self.get_register(b)?;
                let right = self.get_register(c)?;
                ValueOperations::binary(opcode, left, right)?
            }
        };
        self.set_register(a, result)?;
        Ok(ExecutionResult::Continue)
    }
}
