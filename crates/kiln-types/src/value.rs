//! Runtime values exchanged through registers and across module calls.

use crate::registry::Ref;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of a value slot: what a signature or register expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    /// Any resource ref (nullable)
    Ref,
}

impl ValueType {
    /// Calling convention character (`i`, `I`, `f`, `F`, `r`)
    pub fn cconv_char(self) -> char {
        match self {
            ValueType::I32 => 'i',
            ValueType::I64 => 'I',
            ValueType::F32 => 'f',
            ValueType::F64 => 'F',
            ValueType::Ref => 'r',
        }
    }

    pub fn from_cconv_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(ValueType::I32),
            'I' => Some(ValueType::I64),
            'f' => Some(ValueType::F32),
            'F' => Some(ValueType::F64),
            'r' => Some(ValueType::Ref),
            _ => None,
        }
    }

    /// Zero value of this type (null for refs)
    pub fn zero(self) -> Value {
        match self {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::Ref => Value::Ref(None),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Ref => "ref",
        };
        write!(f, "{}", name)
    }
}

/// A register or argument value.
///
/// Refs are owning: cloning a `Value::Ref` retains, dropping releases.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ref(Option<Ref>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    /// Kind of the referenced resource, if this is a non-null ref
    pub fn ref_kind(&self) -> Option<ResourceKind> {
        match self {
            Value::Ref(Some(r)) => Some(r.kind()),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => r.as_ref(),
            _ => None,
        }
    }

    pub fn is_null_ref(&self) -> bool {
        matches!(self, Value::Ref(None))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(Some(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cconv_chars() {
        for ty in [
            ValueType::I32,
            ValueType::I64,
            ValueType::F32,
            ValueType::F64,
            ValueType::Ref,
        ] {
            assert_eq!(ValueType::from_cconv_char(ty.cconv_char()), Some(ty));
            assert_eq!(ty.zero().value_type(), ty);
        }
        assert_eq!(ValueType::from_cconv_char('x'), None);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(7i32).as_i32(), Some(7));
        assert_eq!(Value::from(7i32).as_i64(), None);
        assert!(Value::Ref(None).is_null_ref());
        assert_eq!(Value::F64(1.5).value_type(), ValueType::F64);
    }
}
