//! Comparison instruction execution

use crate::error::VmError;
use crate::opcode::{instruction::*, OpCode};
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;
use crate::vm::Fiber;

impl Fiber {
    /// Execute comparison instructions
    pub(crate) fn execute_comparison(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        let a = decode_a(instruction);
        let b = decode_b(instruction);
        let c = decode_c(instruction);

        let result = match opcode {
            OpCode::IsNull => ValueOperations::is_null(self.get_register(b)?)?,
            OpCode::RefEq => {
                ValueOperations::ref_eq(self.get_register(b)?, self.get_register(c)?)?
            }
            _ => ValueOperations::compare(opcode, self.get_register(b)?, self.get_register(c)?)?,
        };
        self.set_register(a, result)?;
        Ok(ExecutionResult::Continue)
    }
}
