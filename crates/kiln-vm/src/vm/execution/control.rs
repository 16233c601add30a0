//! Control flow instruction execution

use crate::error::{TrapKind, VmError};
use crate::opcode::{instruction::*, OpCode};
use crate::vm::ops::ValueOperations;
use crate::vm::result::ExecutionResult;
use crate::vm::Fiber;
use kiln_types::Value;

impl Fiber {
    /// Execute control flow instructions
    pub(crate) fn execute_control(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        let a = decode_a(instruction);

        match opcode {
            OpCode::Jump => {
                self.current_frame_mut()?.jump(decode_sbx(instruction));
                Ok(ExecutionResult::Continue)
            }

            OpCode::BranchIf | OpCode::BranchUnless => {
                let taken = ValueOperations::is_truthy(self.get_register(a)?)?;
                if taken == (opcode == OpCode::BranchIf) {
                    self.current_frame_mut()?.jump(decode_sbx(instruction));
                }
                Ok(ExecutionResult::Continue)
            }

            OpCode::Return => {
                let count = decode_b(instruction) as usize;
                let values = self.current_frame()?.registers.slice(a, count)?;
                Ok(ExecutionResult::Return(values))
            }

            OpCode::Fail => {
                let code = match self.get_register(a)? {
                    Value::I32(code) => *code,
                    other => {
                        return Err(VmError::type_mismatch(
                            "i32 status",
                            other.value_type().to_string(),
                        ))
                    }
                };
                let idx = decode_bx(instruction) as usize;
                let message = self
                    .current_frame()?
                    .module
                    .constants
                    .get_string(idx)
                    .ok_or(TrapKind::InvalidConstant(idx))?
                    .to_string();
                Err(TrapKind::ModuleFailure { code, message }.into())
            }

            _ => unreachable!("Non-control opcode in control handler"),
        }
    }
}
