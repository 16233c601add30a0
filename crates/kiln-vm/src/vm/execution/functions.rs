//! Call instruction execution

use crate::error::{TrapKind, VmError};
use crate::module::Module;
use crate::opcode::{instruction::*, OpCode};
use crate::vm::result::ExecutionResult;
use crate::vm::Fiber;

impl Fiber {
    /// Execute internal and import calls.
    ///
    /// Arguments are read from R[A..A+params]; results are written back
    /// starting at R[A] when the callee returns.
    pub(crate) fn execute_functions(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        let a = decode_a(instruction);
        let bx = decode_bx(instruction) as usize;
        let (module, module_index) = {
            let frame = self.current_frame()?;
            (frame.module.clone(), frame.module_index)
        };

        match opcode {
            OpCode::Call => {
                let function = module
                    .function(bx)
                    .cloned()
                    .ok_or(TrapKind::InvalidFunction(bx))?;
                self.push_call(function, module, module_index, a)
            }

            OpCode::CallImport => {
                let import = module
                    .imports
                    .get(bx)
                    .ok_or(TrapKind::InvalidFunction(bx))?;
                let resolved = self
                    .context
                    .loaded(module_index)?
                    .imports
                    .get(bx)
                    .copied()
                    .flatten()
                    .ok_or_else(|| TrapKind::UnresolvedImport(import.full_name()))?;

                let target = self.context.loaded(resolved.module_index)?.module.clone();
                match target {
                    Module::Bytecode(callee_module) => {
                        let function = callee_module
                            .function(resolved.function)
                            .cloned()
                            .ok_or(TrapKind::InvalidFunction(resolved.function))?;
                        self.push_call(function, callee_module, resolved.module_index, a)
                    }
                    Module::Native(_) => self.call_native_import(
                        resolved.module_index,
                        resolved.function,
                        a,
                        import.signature.params.len(),
                    ),
                }
            }

            _ => unreachable!("Non-call opcode in call handler"),
        }
    }
}
