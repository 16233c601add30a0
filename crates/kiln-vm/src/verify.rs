//! Structural verification run on every module before it is loaded.
//!
//! Only checks that can be decided statically: indices into module tables,
//! branch targets and register window sizes. Register operands themselves
//! are bounds-checked when executed.

use crate::bytecode::{BytecodeModule, FunctionPrototype, MAX_REGISTERS};
use crate::error::VmError;
use crate::opcode::{instruction::*, OpCode};
use std::collections::HashSet;

pub fn verify_module(module: &BytecodeModule) -> Result<(), VmError> {
    if module.name.is_empty() || module.name.contains('.') {
        return Err(invalid(format!(
            "module name '{}' must be non-empty and contain no '.'",
            module.name
        )));
    }

    for import in &module.imports {
        if import.module.is_empty() || import.name.is_empty() {
            return Err(invalid(format!("malformed import '{}'", import.full_name())));
        }
    }

    let mut seen = HashSet::new();
    for export in &module.exports {
        if !seen.insert(export.name.as_str()) {
            return Err(invalid(format!("duplicate export '{}'", export.name)));
        }
        if export.function as usize >= module.functions.len() {
            return Err(invalid(format!(
                "export '{}' names function {} of {}",
                export.name,
                export.function,
                module.functions.len()
            )));
        }
    }

    for (ordinal, function) in module.functions.iter().enumerate() {
        verify_function(module, function).map_err(|message| {
            invalid(format!("function {} '{}': {}", ordinal, function.name, message))
        })?;
    }
    Ok(())
}

fn verify_function(module: &BytecodeModule, function: &FunctionPrototype) -> Result<(), String> {
    let registers = function.register_count as usize;
    if registers > MAX_REGISTERS {
        return Err(format!("{} registers exceeds {}", registers, MAX_REGISTERS));
    }
    if registers < function.signature.params.len() {
        return Err(format!(
            "{} registers cannot hold {} parameters",
            registers,
            function.signature.params.len()
        ));
    }

    for (pc, &inst) in function.code.iter().enumerate() {
        let byte = decode_opcode(inst);
        let opcode =
            OpCode::from_u8(byte).ok_or_else(|| format!("pc {}: invalid opcode {}", pc, byte))?;
        let a = decode_a(inst) as usize;
        let bx = decode_bx(inst) as usize;
        let at = |msg: String| format!("pc {}: {} {}", pc, opcode, msg);

        match opcode {
            OpCode::LoadConst if bx >= module.constants.constants.len() => {
                return Err(at(format!("constant {} out of range", bx)));
            }
            OpCode::GlobalLoad | OpCode::GlobalStore if bx >= module.globals.len() => {
                return Err(at(format!("global {} out of range", bx)));
            }
            OpCode::LoadRodata if bx >= module.rodata.len() => {
                return Err(at(format!("rodata segment {} out of range", bx)));
            }
            OpCode::Fail if bx >= module.constants.strings.len() => {
                return Err(at(format!("string {} out of range", bx)));
            }
            OpCode::Call => {
                let callee = module
                    .functions
                    .get(bx)
                    .ok_or_else(|| at(format!("function {} out of range", bx)))?;
                let span = callee.signature.params.len().max(callee.signature.results.len());
                if a + span > registers {
                    return Err(at(format!("argument window R{}+{} exceeds frame", a, span)));
                }
            }
            OpCode::CallImport => {
                let import = module
                    .imports
                    .get(bx)
                    .ok_or_else(|| at(format!("import {} out of range", bx)))?;
                let span = import.signature.params.len().max(import.signature.results.len());
                if a + span > registers {
                    return Err(at(format!("argument window R{}+{} exceeds frame", a, span)));
                }
            }
            OpCode::Return => {
                let count = decode_b(inst) as usize;
                if count != function.signature.results.len() {
                    return Err(at(format!(
                        "returns {} values, signature declares {}",
                        count,
                        function.signature.results.len()
                    )));
                }
                if a + count > registers {
                    return Err(at(format!("result window R{}+{} exceeds frame", a, count)));
                }
            }
            OpCode::Cast | OpCode::CastU if decode_c(inst) > 3 => {
                return Err(at(format!("invalid cast target {}", decode_c(inst))));
            }
            op if op.is_branch() => {
                let target = pc as i64 + 1 + decode_sbx(inst) as i64;
                if target < 0 || target >= function.code.len() as i64 {
                    return Err(at(format!("branch target {} out of range", target)));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn invalid(message: String) -> VmError {
    VmError::InvalidModule(message)
}
