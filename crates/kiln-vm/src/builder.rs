//! Programmatic module assembly.
//!
//! Hosts and tests build modules here instead of hand-encoding words:
//!
//! ```ignore
//! let mut f = FunctionBuilder::new("add", "0ii_i")?;
//! f.abc(OpCode::Add, 0, 0, 1).ret(0);
//! let mut m = ModuleBuilder::new("math");
//! let add = m.function(f)?;
//! m.export("add", add);
//! let module = m.build()?;
//! ```

use crate::bytecode::{BytecodeModule, Constant, ExportDecl, FunctionPrototype, ImportDecl};
use crate::error::VmError;
use crate::opcode::{instruction::*, OpCode};
use crate::signature::Signature;
use crate::verify::verify_module;
use kiln_types::sync::Arc;
use kiln_types::ValueType;
use std::collections::HashMap;

fn ordinal(len: usize, what: &str) -> Result<u16, VmError> {
    u16::try_from(len).map_err(|_| VmError::InvalidModule(format!("too many {}", what)))
}

/// Assembles one function, resolving branch labels on [`build`](Self::build).
#[derive(Debug)]
pub struct FunctionBuilder {
    prototype: FunctionPrototype,
    labels: HashMap<String, usize>,
    fixups: Vec<(usize, String)>,
}

impl FunctionBuilder {
    pub fn new(name: &str, cconv: &str) -> Result<Self, VmError> {
        Ok(Self {
            prototype: FunctionPrototype::new(name, Signature::parse(cconv)?),
            labels: HashMap::new(),
            fixups: Vec::new(),
        })
    }

    /// Widen the register window (never shrinks below the signature)
    pub fn registers(&mut self, count: u16) -> &mut Self {
        self.prototype.register_count = self.prototype.register_count.max(count);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.prototype.signature
    }

    /// Position of the next instruction
    pub fn position(&self) -> usize {
        self.prototype.code.len()
    }

    pub fn abc(&mut self, op: OpCode, a: u8, b: u8, c: u8) -> &mut Self {
        self.prototype.add_instruction(encode_abc(op.as_u8(), a, b, c));
        self
    }

    pub fn abx(&mut self, op: OpCode, a: u8, bx: u16) -> &mut Self {
        self.prototype.add_instruction(encode_abx(op.as_u8(), a, bx));
        self
    }

    pub fn asbx(&mut self, op: OpCode, a: u8, sbx: i16) -> &mut Self {
        self.prototype.add_instruction(encode_asbx(op.as_u8(), a, sbx));
        self
    }

    /// Bind `name` to the next instruction
    pub fn label(&mut self, name: &str) -> &mut Self {
        self.labels.insert(name.to_string(), self.position());
        self
    }

    pub fn jump(&mut self, label: &str) -> &mut Self {
        self.branch(OpCode::Jump, 0, label)
    }

    pub fn branch_if(&mut self, cond: u8, label: &str) -> &mut Self {
        self.branch(OpCode::BranchIf, cond, label)
    }

    pub fn branch_unless(&mut self, cond: u8, label: &str) -> &mut Self {
        self.branch(OpCode::BranchUnless, cond, label)
    }

    fn branch(&mut self, op: OpCode, a: u8, label: &str) -> &mut Self {
        let pos = self.prototype.add_instruction(encode_asbx(op.as_u8(), a, 0));
        self.fixups.push((pos, label.to_string()));
        self
    }

    /// R[reg] = value via an immediate load
    pub fn load_i32(&mut self, reg: u8, value: i16) -> &mut Self {
        self.asbx(OpCode::LoadImm, reg, value)
    }

    pub fn mov(&mut self, dst: u8, src: u8) -> &mut Self {
        self.abc(OpCode::Move, dst, src, 0)
    }

    pub fn call(&mut self, base: u8, function: u16) -> &mut Self {
        self.abx(OpCode::Call, base, function)
    }

    pub fn call_import(&mut self, base: u8, import: u16) -> &mut Self {
        self.abx(OpCode::CallImport, base, import)
    }

    /// Return as many values as the signature declares, starting at `base`
    pub fn ret(&mut self, base: u8) -> &mut Self {
        let count = self.prototype.signature.results.len() as u8;
        self.abc(OpCode::Return, base, count, 0)
    }

    pub fn build(mut self) -> Result<FunctionPrototype, VmError> {
        for (pos, label) in std::mem::take(&mut self.fixups) {
            let target = *self.labels.get(&label).ok_or_else(|| {
                VmError::InvalidModule(format!(
                    "function '{}': undefined label '{}'",
                    self.prototype.name, label
                ))
            })?;
            let offset = target as i64 - (pos as i64 + 1);
            let offset = i16::try_from(offset).map_err(|_| {
                VmError::InvalidModule(format!(
                    "function '{}': branch to '{}' out of range",
                    self.prototype.name, label
                ))
            })?;
            let inst = self.prototype.code[pos];
            let patched = encode_asbx(decode_opcode(inst), decode_a(inst), offset);
            self.prototype.patch_instruction(pos, patched);
        }
        Ok(self.prototype)
    }
}

/// Assembles a [`BytecodeModule`]; `build` runs the verifier.
#[derive(Debug)]
pub struct ModuleBuilder {
    module: BytecodeModule,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            module: BytecodeModule::new(name),
        }
    }

    pub fn version(&mut self, version: u32) -> &mut Self {
        self.module.version = version;
        self
    }

    /// Declare a required import and return its ordinal
    pub fn import(&mut self, module: &str, name: &str, cconv: &str) -> Result<u16, VmError> {
        self.push_import(module, name, cconv, false)
    }

    /// Declare an import that may stay unresolved; calling it then traps
    pub fn optional_import(
        &mut self,
        module: &str,
        name: &str,
        cconv: &str,
    ) -> Result<u16, VmError> {
        self.push_import(module, name, cconv, true)
    }

    fn push_import(
        &mut self,
        module: &str,
        name: &str,
        cconv: &str,
        optional: bool,
    ) -> Result<u16, VmError> {
        let idx = ordinal(self.module.imports.len(), "imports")?;
        self.module.imports.push(ImportDecl {
            module: module.to_string(),
            name: name.to_string(),
            signature: Signature::parse(cconv)?,
            optional,
        });
        Ok(idx)
    }

    pub fn constant(&mut self, value: Constant) -> Result<u16, VmError> {
        ordinal(self.module.constants.add_constant(value), "constants")
    }

    /// Intern a string (failure messages)
    pub fn string(&mut self, s: &str) -> Result<u16, VmError> {
        ordinal(self.module.constants.add_string(s), "strings")
    }

    pub fn rodata(&mut self, bytes: &[u8]) -> Result<u16, VmError> {
        let idx = ordinal(self.module.rodata.len(), "rodata segments")?;
        self.module.rodata.push(Arc::from(bytes));
        Ok(idx)
    }

    pub fn global(&mut self, ty: ValueType) -> Result<u16, VmError> {
        let idx = ordinal(self.module.globals.len(), "globals")?;
        self.module.globals.push(ty);
        Ok(idx)
    }

    /// Add a function and return its ordinal
    pub fn function(&mut self, function: FunctionBuilder) -> Result<u16, VmError> {
        let idx = ordinal(self.module.functions.len(), "functions")?;
        self.module.functions.push(Arc::new(function.build()?));
        Ok(idx)
    }

    pub fn export(&mut self, name: &str, function: u16) -> &mut Self {
        self.module.exports.push(ExportDecl {
            name: name.to_string(),
            function,
        });
        self
    }

    pub fn build(self) -> Result<BytecodeModule, VmError> {
        verify_module(&self.module)?;
        Ok(self.module)
    }
}
