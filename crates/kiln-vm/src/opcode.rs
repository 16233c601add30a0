//! OpCode definitions for the Kiln VM
//!
//! Instructions are encoded as 32-bit values with the following formats:
//!
//! Format ABC: [8-bit opcode][8-bit A][8-bit B][8-bit C]
//! Format ABx: [8-bit opcode][8-bit A][16-bit Bx]
//!
//! A, B and C name registers (0-255) unless noted otherwise. Branch offsets
//! (sBx) are relative to the instruction after the branch.

use std::fmt;

/// Virtual machine instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// No operation
    Nop = 0,

    // ===== Constants & Moves =====
    /// Load constant from pool: R[A] = K[Bx]
    LoadConst = 1,
    /// Load immediate: R[A] = i32(sBx)
    LoadImm = 2,
    /// Load null ref: R[A] = null
    LoadNull = 3,
    /// Move register: R[A] = R[B]
    Move = 4,
    /// Load global: R[A] = G[Bx]
    GlobalLoad = 5,
    /// Store global: G[Bx] = R[A]
    GlobalStore = 6,
    /// Load rodata segment ref: R[A] = rodata[Bx]
    LoadRodata = 7,

    // ===== Arithmetic =====
    /// Addition: R[A] = R[B] + R[C]
    Add = 10,
    /// Subtraction: R[A] = R[B] - R[C]
    Sub = 11,
    /// Multiplication: R[A] = R[B] * R[C]
    Mul = 12,
    /// Signed division: R[A] = R[B] / R[C]
    Div = 13,
    /// Signed remainder: R[A] = R[B] % R[C]
    Rem = 14,
    /// Negation: R[A] = -R[B]
    Neg = 15,
    /// Unsigned division: R[A] = R[B] /u R[C]
    DivU = 16,
    /// Unsigned remainder: R[A] = R[B] %u R[C]
    RemU = 17,

    // ===== Bitwise =====
    /// R[A] = R[B] & R[C]
    And = 20,
    /// R[A] = R[B] | R[C]
    Or = 21,
    /// R[A] = R[B] ^ R[C]
    Xor = 22,
    /// R[A] = !R[B]
    Not = 23,
    /// R[A] = R[B] << R[C]
    Shl = 24,
    /// Arithmetic shift: R[A] = R[B] >> R[C]
    ShrS = 25,
    /// Logical shift: R[A] = R[B] >>> R[C]
    ShrU = 26,

    // ===== Casts =====
    /// Signed cast: R[A] = R[B] as type C
    Cast = 30,
    /// Unsigned cast: R[A] = R[B] as type C (zero-extending)
    CastU = 31,

    // ===== Comparison =====
    /// Equal: R[A] = R[B] == R[C]
    Eq = 40,
    /// Not equal: R[A] = R[B] != R[C]
    Ne = 41,
    /// Less than: R[A] = R[B] < R[C]
    Lt = 42,
    /// Less or equal: R[A] = R[B] <= R[C]
    Le = 43,
    /// Greater than: R[A] = R[B] > R[C]
    Gt = 44,
    /// Greater or equal: R[A] = R[B] >= R[C]
    Ge = 45,
    /// Unsigned less than: R[A] = R[B] <u R[C]
    LtU = 46,
    /// Ref identity: R[A] = R[B] is R[C]
    RefEq = 47,
    /// Null test: R[A] = R[B] == null
    IsNull = 48,

    // ===== Control =====
    /// Unconditional jump: IP += sBx
    Jump = 50,
    /// Branch if nonzero: if R[A] != 0 then IP += sBx
    BranchIf = 51,
    /// Branch if zero: if R[A] == 0 then IP += sBx
    BranchUnless = 52,
    /// Call internal function Bx: args R[A..], results R[A..]
    Call = 53,
    /// Call import Bx: args R[A..], results R[A..]
    CallImport = 54,
    /// Return B values starting at R[A]
    Return = 55,
    /// Fail with status R[A] and message string Bx
    Fail = 56,

    // ===== Lists =====
    /// New variant list: R[A] = list(capacity R[B])
    ListAlloc = 60,
    /// List size: R[A] = size(R[B])
    ListSize = 61,
    /// Resize: resize(R[A], R[B])
    ListResize = 62,
    /// Get element: R[A] = R[B][R[C]]
    ListGet = 63,
    /// Set element: R[A][R[B]] = R[C]
    ListSet = 64,
    /// Append: push(R[A], R[B])
    ListPush = 65,
}

impl OpCode {
    /// Every opcode, in encoding order
    pub const ALL: [OpCode; 47] = [
        OpCode::Nop,
        OpCode::LoadConst,
        OpCode::LoadImm,
        OpCode::LoadNull,
        OpCode::Move,
        OpCode::GlobalLoad,
        OpCode::GlobalStore,
        OpCode::LoadRodata,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Rem,
        OpCode::Neg,
        OpCode::DivU,
        OpCode::RemU,
        OpCode::And,
        OpCode::Or,
        OpCode::Xor,
        OpCode::Not,
        OpCode::Shl,
        OpCode::ShrS,
        OpCode::ShrU,
        OpCode::Cast,
        OpCode::CastU,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::LtU,
        OpCode::RefEq,
        OpCode::IsNull,
        OpCode::Jump,
        OpCode::BranchIf,
        OpCode::BranchUnless,
        OpCode::Call,
        OpCode::CallImport,
        OpCode::Return,
        OpCode::Fail,
        OpCode::ListAlloc,
        OpCode::ListSize,
        OpCode::ListResize,
        OpCode::ListGet,
        OpCode::ListSet,
        OpCode::ListPush,
    ];

    /// Convert u8 to OpCode
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_u8() == byte)
    }

    /// Convert OpCode to u8
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the instruction carries a signed branch offset in sBx
    pub fn is_branch(self) -> bool {
        matches!(self, OpCode::Jump | OpCode::BranchIf | OpCode::BranchUnless)
    }

    /// Get opcode name for debugging
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "NOP",
            OpCode::LoadConst => "LOAD_CONST",
            OpCode::LoadImm => "LOAD_IMM",
            OpCode::LoadNull => "LOAD_NULL",
            OpCode::Move => "MOVE",
            OpCode::GlobalLoad => "GLOBAL_LOAD",
            OpCode::GlobalStore => "GLOBAL_STORE",
            OpCode::LoadRodata => "LOAD_RODATA",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Rem => "REM",
            OpCode::Neg => "NEG",
            OpCode::DivU => "DIV_U",
            OpCode::RemU => "REM_U",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Xor => "XOR",
            OpCode::Not => "NOT",
            OpCode::Shl => "SHL",
            OpCode::ShrS => "SHR_S",
            OpCode::ShrU => "SHR_U",
            OpCode::Cast => "CAST",
            OpCode::CastU => "CAST_U",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::LtU => "LT_U",
            OpCode::RefEq => "REF_EQ",
            OpCode::IsNull => "IS_NULL",
            OpCode::Jump => "JUMP",
            OpCode::BranchIf => "BRANCH_IF",
            OpCode::BranchUnless => "BRANCH_UNLESS",
            OpCode::Call => "CALL",
            OpCode::CallImport => "CALL_IMPORT",
            OpCode::Return => "RETURN",
            OpCode::Fail => "FAIL",
            OpCode::ListAlloc => "LIST_ALLOC",
            OpCode::ListSize => "LIST_SIZE",
            OpCode::ListResize => "LIST_RESIZE",
            OpCode::ListGet => "LIST_GET",
            OpCode::ListSet => "LIST_SET",
            OpCode::ListPush => "LIST_PUSH",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Instruction encoding/decoding utilities
pub mod instruction {
    /// Encode instruction in ABC format
    #[inline]
    pub fn encode_abc(opcode: u8, a: u8, b: u8, c: u8) -> u32 {
        ((opcode as u32) << 24) | ((a as u32) << 16) | ((b as u32) << 8) | (c as u32)
    }

    /// Encode instruction in ABx format
    #[inline]
    pub fn encode_abx(opcode: u8, a: u8, bx: u16) -> u32 {
        ((opcode as u32) << 24) | ((a as u32) << 16) | (bx as u32)
    }

    /// Encode instruction with a signed 16-bit operand
    #[inline]
    pub fn encode_asbx(opcode: u8, a: u8, sbx: i16) -> u32 {
        encode_abx(opcode, a, sbx as u16)
    }

    /// Decode instruction opcode
    #[inline]
    pub fn decode_opcode(instruction: u32) -> u8 {
        (instruction >> 24) as u8
    }

    /// Decode A operand
    #[inline]
    pub fn decode_a(instruction: u32) -> u8 {
        ((instruction >> 16) & 0xFF) as u8
    }

    /// Decode B operand
    #[inline]
    pub fn decode_b(instruction: u32) -> u8 {
        ((instruction >> 8) & 0xFF) as u8
    }

    /// Decode C operand
    #[inline]
    pub fn decode_c(instruction: u32) -> u8 {
        (instruction & 0xFF) as u8
    }

    /// Decode Bx operand (16-bit)
    #[inline]
    pub fn decode_bx(instruction: u32) -> u16 {
        (instruction & 0xFFFF) as u16
    }

    /// Decode signed Bx operand
    #[inline]
    pub fn decode_sbx(instruction: u32) -> i16 {
        decode_bx(instruction) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instruction::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(OpCode::Add.as_u8(), 10);
        assert_eq!(OpCode::from_u8(10), Some(OpCode::Add));
        assert_eq!(OpCode::from_u8(9), None);
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_u8(op.as_u8()), Some(op));
        }
    }

    #[test]
    fn test_instruction_encoding() {
        let inst = encode_abc(OpCode::Add.as_u8(), 1, 2, 3);
        assert_eq!(decode_opcode(inst), OpCode::Add.as_u8());
        assert_eq!(decode_a(inst), 1);
        assert_eq!(decode_b(inst), 2);
        assert_eq!(decode_c(inst), 3);
    }

    #[test]
    fn test_negative_branch_offset() {
        let inst = encode_asbx(OpCode::Jump.as_u8(), 0, -3);
        assert_eq!(decode_sbx(inst), -3);
        assert!(OpCode::Jump.is_branch());
    }
}
