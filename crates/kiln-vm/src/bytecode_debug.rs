//! Bytecode disassembly for diagnostics

use crate::bytecode::{BytecodeModule, FunctionPrototype};
use crate::opcode::{instruction::*, OpCode};
use std::fmt::Write;

/// Render a whole module: imports, exports, then every function.
pub fn disassemble_module(module: &BytecodeModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {} (version {})", module.name, module.version);
    for (i, import) in module.imports.iter().enumerate() {
        let _ = writeln!(
            out,
            "  import[{}] {} {}{}",
            i,
            import.full_name(),
            import.signature,
            if import.optional { " optional" } else { "" }
        );
    }
    for export in &module.exports {
        let _ = writeln!(out, "  export {} -> fn[{}]", export.name, export.function);
    }
    for function in &module.functions {
        out.push_str(&disassemble_function(function, Some(module)));
    }
    out
}

/// Render one function. With `module`, constant and callee operands are
/// annotated.
pub fn disassemble_function(func: &FunctionPrototype, module: Option<&BytecodeModule>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n== fn {} {} registers={} ==",
        func.name, func.signature, func.register_count
    );
    for (pc, &inst) in func.code.iter().enumerate() {
        let _ = writeln!(out, "{:04}  {}", pc, disassemble_instruction(pc, inst, module));
    }
    out
}

fn disassemble_instruction(pc: usize, inst: u32, module: Option<&BytecodeModule>) -> String {
    let byte = decode_opcode(inst);
    let opcode = match OpCode::from_u8(byte) {
        Some(op) => op,
        None => return format!("UNKNOWN opcode={} (raw: 0x{:08x})", byte, inst),
    };
    let a = decode_a(inst);
    let b = decode_b(inst);
    let c = decode_c(inst);
    let bx = decode_bx(inst);

    match opcode {
        OpCode::Nop => "NOP".to_string(),
        OpCode::LoadConst => {
            let note = module
                .and_then(|m| m.constants.get_constant(bx as usize))
                .map(|k| format!("  ; {:?}", k))
                .unwrap_or_default();
            format!("{:<14}R{} K[{}]{}", opcode, a, bx, note)
        }
        OpCode::LoadImm => format!("{:<14}R{} {}", opcode, a, decode_sbx(inst)),
        OpCode::LoadNull => format!("{:<14}R{}", opcode, a),
        OpCode::GlobalLoad | OpCode::LoadRodata => format!("{:<14}R{} [{}]", opcode, a, bx),
        OpCode::GlobalStore => format!("{:<14}[{}] R{}", opcode, bx, a),
        OpCode::Move | OpCode::Neg | OpCode::Not | OpCode::IsNull | OpCode::ListSize => {
            format!("{:<14}R{} R{}", opcode, a, b)
        }
        OpCode::Cast | OpCode::CastU => {
            let target = ["i32", "i64", "f32", "f64"]
                .get(c as usize)
                .copied()
                .unwrap_or("?");
            format!("{:<14}R{} R{} -> {}", opcode, a, b, target)
        }
        OpCode::Jump => format!(
            "{:<14}{:+} -> {:04}",
            opcode,
            decode_sbx(inst),
            pc as i64 + 1 + decode_sbx(inst) as i64
        ),
        OpCode::BranchIf | OpCode::BranchUnless => format!(
            "{:<14}R{} {:+} -> {:04}",
            opcode,
            a,
            decode_sbx(inst),
            pc as i64 + 1 + decode_sbx(inst) as i64
        ),
        OpCode::Call => {
            let note = module
                .and_then(|m| m.function(bx as usize))
                .map(|f| format!("  ; {} {}", f.name, f.signature))
                .unwrap_or_default();
            format!("{:<14}R{} fn[{}]{}", opcode, a, bx, note)
        }
        OpCode::CallImport => {
            let note = module
                .and_then(|m| m.imports.get(bx as usize))
                .map(|i| format!("  ; {} {}", i.full_name(), i.signature))
                .unwrap_or_default();
            format!("{:<14}R{} import[{}]{}", opcode, a, bx, note)
        }
        OpCode::Return => format!("{:<14}R{} count={}", opcode, a, b),
        OpCode::Fail => {
            let note = module
                .and_then(|m| m.constants.get_string(bx as usize))
                .map(|s| format!("  ; {:?}", s))
                .unwrap_or_default();
            format!("{:<14}R{} S[{}]{}", opcode, a, bx, note)
        }
        OpCode::ListAlloc | OpCode::ListResize | OpCode::ListPush => {
            format!("{:<14}R{} R{}", opcode, a, b)
        }
        _ => format!("{:<14}R{} R{} R{}", opcode, a, b, c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{FunctionBuilder, ModuleBuilder};

    #[test]
    fn test_disassemble_annotates_operands() {
        let mut m = ModuleBuilder::new("demo");
        let mut f = FunctionBuilder::new("add", "0ii_i").unwrap();
        f.abc(OpCode::Add, 0, 0, 1).ret(0);
        let ord = m.function(f).unwrap();
        m.export("add", ord);
        let text = disassemble_module(&m.build().unwrap());

        assert!(text.contains("export add -> fn[0]"));
        assert!(text.contains("== fn add 0ii_i registers=2 =="));
        assert!(text.contains("ADD"));
        assert!(text.contains("RETURN"));
    }

    #[test]
    fn test_unknown_opcode_is_rendered() {
        let mut proto = FunctionPrototype::new("f", "0v_v".parse().unwrap());
        proto.add_instruction(0xFF00_0000);
        assert!(disassemble_function(&proto, None).contains("UNKNOWN opcode=255"));
    }
}
