//! Value operation helpers
//!
//! Operands must share a type; nothing is promoted implicitly. Integer
//! arithmetic wraps, integer division by zero traps, shift amounts are
//! taken modulo the bit width, comparisons produce `i32` 0 or 1.

use crate::error::{TrapKind, VmError};
use crate::opcode::OpCode;
use kiln_types::Value;

macro_rules! int_binary {
    ($opcode:expr, $a:expr, $b:expr, $signed:ty, $unsigned:ty) => {{
        let (a, b) = ($a, $b);
        match $opcode {
            OpCode::Add => a.wrapping_add(b),
            OpCode::Sub => a.wrapping_sub(b),
            OpCode::Mul => a.wrapping_mul(b),
            OpCode::Div | OpCode::Rem | OpCode::DivU | OpCode::RemU if b == 0 => {
                return Err(TrapKind::DivisionByZero.into());
            }
            OpCode::Div => a.wrapping_div(b),
            OpCode::Rem => a.wrapping_rem(b),
            OpCode::DivU => ((a as $unsigned) / (b as $unsigned)) as $signed,
            OpCode::RemU => ((a as $unsigned) % (b as $unsigned)) as $signed,
            OpCode::And => a & b,
            OpCode::Or => a | b,
            OpCode::Xor => a ^ b,
            OpCode::Shl => a.wrapping_shl(b as u32),
            OpCode::ShrS => a.wrapping_shr(b as u32),
            OpCode::ShrU => (a as $unsigned).wrapping_shr(b as u32) as $signed,
            _ => return Err(unsupported($opcode, "integer")),
        }
    }};
}

macro_rules! float_binary {
    ($opcode:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a, $b);
        match $opcode {
            OpCode::Add => a + b,
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div => a / b,
            OpCode::Rem => a % b,
            _ => return Err(unsupported($opcode, "float")),
        }
    }};
}

macro_rules! compare {
    ($opcode:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a, $b);
        match $opcode {
            OpCode::Eq => a == b,
            OpCode::Ne => a != b,
            OpCode::Lt => a < b,
            OpCode::Le => a <= b,
            OpCode::Gt => a > b,
            OpCode::Ge => a >= b,
            _ => return Err(unsupported($opcode, "comparison")),
        }
    }};
}

fn unsupported(opcode: OpCode, operands: &str) -> VmError {
    VmError::type_mismatch(
        format!("operands supported by {}", opcode),
        format!("{} operands", operands),
    )
}

fn operand_mismatch(opcode: OpCode, left: &Value, right: &Value) -> VmError {
    VmError::type_mismatch(
        format!("matching numeric operands for {}", opcode),
        format!("{} and {}", left.value_type(), right.value_type()),
    )
}

/// Implementation of value operations for the VM
pub(crate) struct ValueOperations;

impl ValueOperations {
    /// Arithmetic, bitwise and shift instructions
    pub(crate) fn binary(opcode: OpCode, left: &Value, right: &Value) -> Result<Value, VmError> {
        match (left, right) {
            (Value::I32(a), Value::I32(b)) => Ok(Value::I32(int_binary!(opcode, *a, *b, i32, u32))),
            (Value::I64(a), Value::I64(b)) => Ok(Value::I64(int_binary!(opcode, *a, *b, i64, u64))),
            (Value::F32(a), Value::F32(b)) => Ok(Value::F32(float_binary!(opcode, *a, *b))),
            (Value::F64(a), Value::F64(b)) => Ok(Value::F64(float_binary!(opcode, *a, *b))),
            _ => Err(operand_mismatch(opcode, left, right)),
        }
    }

    pub(crate) fn neg_value(value: &Value) -> Result<Value, VmError> {
        match value {
            Value::I32(v) => Ok(Value::I32(v.wrapping_neg())),
            Value::I64(v) => Ok(Value::I64(v.wrapping_neg())),
            Value::F32(v) => Ok(Value::F32(-v)),
            Value::F64(v) => Ok(Value::F64(-v)),
            Value::Ref(_) => Err(VmError::type_mismatch("numeric operand", "ref")),
        }
    }

    pub(crate) fn not_value(value: &Value) -> Result<Value, VmError> {
        match value {
            Value::I32(v) => Ok(Value::I32(!v)),
            Value::I64(v) => Ok(Value::I64(!v)),
            other => Err(VmError::type_mismatch(
                "integer operand",
                other.value_type().to_string(),
            )),
        }
    }

    /// Numeric comparison producing `i32` 0/1
    pub(crate) fn compare(opcode: OpCode, left: &Value, right: &Value) -> Result<Value, VmError> {
        let result = match (opcode, left, right) {
            (OpCode::LtU, Value::I32(a), Value::I32(b)) => (*a as u32) < (*b as u32),
            (OpCode::LtU, Value::I64(a), Value::I64(b)) => (*a as u64) < (*b as u64),
            (_, Value::I32(a), Value::I32(b)) => compare!(opcode, a, b),
            (_, Value::I64(a), Value::I64(b)) => compare!(opcode, a, b),
            (_, Value::F32(a), Value::F32(b)) => compare!(opcode, a, b),
            (_, Value::F64(a), Value::F64(b)) => compare!(opcode, a, b),
            _ => return Err(operand_mismatch(opcode, left, right)),
        };
        Ok(Value::I32(result as i32))
    }

    /// Ref identity: both null, or the same registry entry
    pub(crate) fn ref_eq(left: &Value, right: &Value) -> Result<Value, VmError> {
        match (left, right) {
            (Value::Ref(a), Value::Ref(b)) => Ok(Value::I32((a == b) as i32)),
            _ => Err(VmError::type_mismatch(
                "ref operands",
                format!("{} and {}", left.value_type(), right.value_type()),
            )),
        }
    }

    pub(crate) fn is_null(value: &Value) -> Result<Value, VmError> {
        match value {
            Value::Ref(r) => Ok(Value::I32(r.is_none() as i32)),
            other => Err(VmError::type_mismatch("ref", other.value_type().to_string())),
        }
    }

    /// Convert to type code `target` (0 i32, 1 i64, 2 f32, 3 f64).
    /// `unsigned` treats integer sources as unsigned and float-to-int
    /// conversions as saturating to the unsigned range.
    pub(crate) fn cast(value: &Value, target: u8, unsigned: bool) -> Result<Value, VmError> {
        let cast = match (value, unsigned) {
            (Value::I32(v), false) => Scalar::Int(*v as i64),
            (Value::I32(v), true) => Scalar::Int(*v as u32 as i64),
            (Value::I64(v), false) => Scalar::Int(*v),
            (Value::I64(v), true) => Scalar::UInt(*v as u64),
            (Value::F32(v), _) => Scalar::Float(*v as f64),
            (Value::F64(v), _) => Scalar::Float(*v),
            (Value::Ref(_), _) => return Err(VmError::type_mismatch("numeric operand", "ref")),
        };
        let result = match (target, cast, unsigned) {
            (0, Scalar::Int(v), _) => Value::I32(v as i32),
            (0, Scalar::UInt(v), _) => Value::I32(v as i32),
            (0, Scalar::Float(v), false) => Value::I32(v as i32),
            (0, Scalar::Float(v), true) => Value::I32(v as u32 as i32),
            (1, Scalar::Int(v), _) => Value::I64(v),
            (1, Scalar::UInt(v), _) => Value::I64(v as i64),
            (1, Scalar::Float(v), false) => Value::I64(v as i64),
            (1, Scalar::Float(v), true) => Value::I64(v as u64 as i64),
            (2, Scalar::Int(v), _) => Value::F32(v as f32),
            (2, Scalar::UInt(v), _) => Value::F32(v as f32),
            (2, Scalar::Float(v), _) => Value::F32(v as f32),
            (3, Scalar::Int(v), _) => Value::F64(v as f64),
            (3, Scalar::UInt(v), _) => Value::F64(v as f64),
            (3, Scalar::Float(v), _) => Value::F64(v),
            _ => {
                return Err(VmError::type_mismatch(
                    "cast target 0..=3",
                    target.to_string(),
                ))
            }
        };
        Ok(result)
    }

    /// Branch condition: nonzero integer
    pub(crate) fn is_truthy(value: &Value) -> Result<bool, VmError> {
        match value {
            Value::I32(v) => Ok(*v != 0),
            Value::I64(v) => Ok(*v != 0),
            other => Err(VmError::type_mismatch(
                "integer condition",
                other.value_type().to_string(),
            )),
        }
    }
}

#[derive(Clone, Copy)]
enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_wraps() {
        let r = ValueOperations::binary(OpCode::Add, &Value::I32(i32::MAX), &Value::I32(1));
        assert_eq!(r, Ok(Value::I32(i32::MIN)));
        let r = ValueOperations::binary(OpCode::Div, &Value::I32(i32::MIN), &Value::I32(-1));
        assert_eq!(r, Ok(Value::I32(i32::MIN)));
        let r = ValueOperations::binary(OpCode::Mul, &Value::I64(3), &Value::I64(-4));
        assert_eq!(r, Ok(Value::I64(-12)));
    }

    #[test]
    fn test_division_by_zero_traps() {
        for op in [OpCode::Div, OpCode::Rem, OpCode::DivU, OpCode::RemU] {
            assert_eq!(
                ValueOperations::binary(op, &Value::I64(1), &Value::I64(0)),
                Err(VmError::Trap(TrapKind::DivisionByZero))
            );
        }
        let r = ValueOperations::binary(OpCode::Div, &Value::F64(1.0), &Value::F64(0.0));
        assert_eq!(r, Ok(Value::F64(f64::INFINITY)));
    }

    #[test]
    fn test_unsigned_and_shift_ops() {
        let r = ValueOperations::binary(OpCode::DivU, &Value::I32(-2), &Value::I32(2));
        assert_eq!(r, Ok(Value::I32(0x7FFF_FFFF)));
        let r = ValueOperations::binary(OpCode::ShrU, &Value::I32(-1), &Value::I32(28));
        assert_eq!(r, Ok(Value::I32(0xF)));
        let r = ValueOperations::binary(OpCode::ShrS, &Value::I32(-16), &Value::I32(2));
        assert_eq!(r, Ok(Value::I32(-4)));
        let r = ValueOperations::binary(OpCode::Shl, &Value::I32(1), &Value::I32(33));
        assert_eq!(r, Ok(Value::I32(2)));
    }

    #[test]
    fn test_mixed_operands_are_rejected() {
        let r = ValueOperations::binary(OpCode::Add, &Value::I32(1), &Value::I64(1));
        assert!(matches!(r, Err(VmError::TypeMismatch { .. })));
        let r = ValueOperations::binary(OpCode::And, &Value::F32(1.0), &Value::F32(1.0));
        assert!(matches!(r, Err(VmError::TypeMismatch { .. })));
    }

    #[test]
    fn test_comparisons() {
        let lt = ValueOperations::compare(OpCode::Lt, &Value::I32(-1), &Value::I32(0));
        assert_eq!(lt, Ok(Value::I32(1)));
        let ltu = ValueOperations::compare(OpCode::LtU, &Value::I32(-1), &Value::I32(0));
        assert_eq!(ltu, Ok(Value::I32(0)));
        let ge = ValueOperations::compare(OpCode::Ge, &Value::F64(2.0), &Value::F64(2.0));
        assert_eq!(ge, Ok(Value::I32(1)));
        assert_eq!(
            ValueOperations::ref_eq(&Value::Ref(None), &Value::Ref(None)),
            Ok(Value::I32(1))
        );
    }

    #[test]
    fn test_casts() {
        assert_eq!(ValueOperations::cast(&Value::I32(-1), 1, false), Ok(Value::I64(-1)));
        assert_eq!(
            ValueOperations::cast(&Value::I32(-1), 1, true),
            Ok(Value::I64(0xFFFF_FFFF))
        );
        assert_eq!(ValueOperations::cast(&Value::F64(2.9), 0, false), Ok(Value::I32(2)));
        assert_eq!(ValueOperations::cast(&Value::F32(-3.0), 0, true), Ok(Value::I32(0)));
        assert_eq!(ValueOperations::cast(&Value::I64(7), 3, false), Ok(Value::F64(7.0)));
        assert!(ValueOperations::cast(&Value::Ref(None), 0, false).is_err());
    }
}
