//! Constant, move, global and rodata instruction execution

use crate::error::{TrapKind, VmError};
use crate::opcode::{instruction::*, OpCode};
use crate::vm::result::ExecutionResult;
use crate::vm::Fiber;
use kiln_types::Value;

impl Fiber {
    /// Execute variable and constant instructions
    pub(crate) fn execute_variables(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        let a = decode_a(instruction);
        let bx = decode_bx(instruction) as usize;

        let value = match opcode {
            OpCode::LoadConst => self
                .current_frame()?
                .module
                .constants
                .get_constant(bx)
                .ok_or(TrapKind::InvalidConstant(bx))?
                .to_value(),

            OpCode::LoadImm => Value::I32(decode_sbx(instruction) as i32),

            OpCode::LoadNull => Value::Ref(None),

            OpCode::Move => self.get_register(decode_b(instruction))?.clone(),

            OpCode::GlobalLoad => {
                let state = self.module_state()?;
                let globals = state.bytecode().ok_or_else(not_bytecode)?;
                globals
                    .globals
                    .get(bx)
                    .cloned()
                    .ok_or(TrapKind::InvalidGlobal(bx))?
            }

            OpCode::GlobalStore => {
                let value = self.get_register(a)?.clone();
                let state = self.module_state()?;
                let previous = {
                    let mut globals = state.bytecode().ok_or_else(not_bytecode)?;
                    let slot = globals
                        .globals
                        .get_mut(bx)
                        .ok_or(TrapKind::InvalidGlobal(bx))?;
                    if slot.value_type() != value.value_type() {
                        return Err(VmError::type_mismatch(
                            format!("global {} of type {}", bx, slot.value_type()),
                            value.value_type().to_string(),
                        ));
                    }
                    std::mem::replace(slot, value)
                };
                // Release the old value outside the state lock
                drop(previous);
                return Ok(ExecutionResult::Continue);
            }

            OpCode::LoadRodata => {
                let state = self.module_state()?;
                let segments = state.bytecode().ok_or_else(not_bytecode)?;
                let segment = segments.rodata.get(bx).cloned().ok_or(TrapKind::IndexOutOfBounds {
                    index: bx as i64,
                    size: segments.rodata.len(),
                })?;
                Value::Ref(Some(segment))
            }

            _ => unreachable!("Non-variable opcode in variable handler"),
        };

        self.set_register(a, value)?;
        Ok(ExecutionResult::Continue)
    }
}

fn not_bytecode() -> VmError {
    VmError::InvalidState("frame module has no bytecode state".into())
}
