//! Bytecode module format and data structures

use crate::signature::Signature;
use kiln_types::sync::Arc;
use kiln_types::{Value, ValueType};

/// Module format version understood by this crate
pub const MODULE_VERSION_MAJOR: u16 = 1;
pub const MODULE_VERSION_MINOR: u16 = 0;

/// Maximum number of registers per function (8-bit addressing)
pub const MAX_REGISTERS: usize = 256;

/// Scalar constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Constant {
    pub fn to_value(self) -> Value {
        match self {
            Constant::I32(v) => Value::I32(v),
            Constant::I64(v) => Value::I64(v),
            Constant::F32(v) => Value::F32(v),
            Constant::F64(v) => Value::F64(v),
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Constant::I32(_) => ValueType::I32,
            Constant::I64(_) => ValueType::I64,
            Constant::F32(_) => ValueType::F32,
            Constant::F64(_) => ValueType::F64,
        }
    }
}

/// Constant pool for bytecode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// Scalar constants
    pub constants: Vec<Constant>,

    /// Interned strings (failure messages, diagnostics)
    pub strings: Vec<String>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant value and return its index
    pub fn add_constant(&mut self, value: Constant) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Add a string and return its index
    pub fn add_string(&mut self, s: &str) -> usize {
        if let Some(idx) = self.strings.iter().position(|existing| existing == s) {
            return idx;
        }

        self.strings.push(s.to_string());
        self.strings.len() - 1
    }

    /// Get constant by index
    pub fn get_constant(&self, idx: usize) -> Option<Constant> {
        self.constants.get(idx).copied()
    }

    /// Get string by index
    pub fn get_string(&self, idx: usize) -> Option<&str> {
        self.strings.get(idx).map(|s| s.as_str())
    }
}

/// Function prototype (compiled function)
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionPrototype {
    /// Function name (for diagnostics)
    pub name: String,

    /// Parameter and result types
    pub signature: Signature,

    /// Size of the register window (at most 256)
    pub register_count: u16,

    /// Bytecode instructions (32-bit each)
    pub code: Vec<u32>,
}

impl FunctionPrototype {
    /// Create a new function prototype
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let register_count = signature.params.len().max(signature.results.len()) as u16;
        Self {
            name: name.into(),
            signature,
            register_count,
            code: Vec::new(),
        }
    }

    /// Add an instruction and return its position
    pub fn add_instruction(&mut self, instruction: u32) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }

    /// Get instruction at position
    pub fn get_instruction(&self, pos: usize) -> Option<u32> {
        self.code.get(pos).copied()
    }

    /// Patch instruction at position
    pub fn patch_instruction(&mut self, pos: usize, instruction: u32) {
        if pos < self.code.len() {
            self.code[pos] = instruction;
        }
    }
}

/// A function this module expects another module to provide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    pub module: String,
    pub name: String,
    pub signature: Signature,
    /// Unresolved optional imports link, and trap only when called
    pub optional: bool,
}

impl ImportDecl {
    /// `module.name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDecl {
    pub name: String,
    /// Ordinal into the module's function table
    pub function: u16,
}

/// Bytecode module (compiled program)
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeModule {
    /// Module name; imports name modules by it
    pub name: String,

    pub version: u32,

    pub imports: Vec<ImportDecl>,

    pub exports: Vec<ExportDecl>,

    /// Module-level constant pool
    pub constants: ConstantPool,

    /// Read-only data segments, exposed as byte buffer refs
    pub rodata: Vec<Arc<[u8]>>,

    /// Global slot types
    pub globals: Vec<ValueType>,

    pub functions: Vec<Arc<FunctionPrototype>>,
}

impl BytecodeModule {
    /// Create a new bytecode module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            imports: Vec::new(),
            exports: Vec::new(),
            constants: ConstantPool::new(),
            rodata: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Find an export by name, returning the function ordinal
    pub fn lookup_export(&self, name: &str) -> Option<usize> {
        self.exports
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.function as usize)
    }

    pub fn function(&self, ordinal: usize) -> Option<&Arc<FunctionPrototype>> {
        self.functions.get(ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_constant(Constant::I32(42));
        let idx2 = pool.add_constant(Constant::F64(1.5));

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(pool.get_constant(0), Some(Constant::I32(42)));
        assert_eq!(pool.get_constant(1).map(Constant::to_value), Some(Value::F64(1.5)));
        assert_eq!(pool.get_constant(2), None);
    }

    #[test]
    fn test_string_interning() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_string("hello");
        let idx2 = pool.add_string("world");
        let idx3 = pool.add_string("hello");

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 0);
        assert_eq!(pool.strings.len(), 2);
    }

    #[test]
    fn test_function_prototype() {
        let sig = Signature::parse("0ii_i").unwrap();
        let mut func = FunctionPrototype::new("test", sig);
        assert_eq!(func.register_count, 2);

        let pos = func.add_instruction(0x12345678);
        assert_eq!(pos, 0);
        assert_eq!(func.get_instruction(0), Some(0x12345678));

        func.patch_instruction(0, 0x87654321);
        assert_eq!(func.get_instruction(0), Some(0x87654321));
    }
}
