//! Calling convention strings.
//!
//! A signature is written `0<params>_<results>`, one character per value
//! (`i` i32, `I` i64, `f` f32, `F` f64, `r` ref) and `v` for an empty side.
//! `0rIi_i` takes a ref, an i64 and an i32 and returns an i32.

use crate::error::VmError;
use kiln_types::{Value, ValueType};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        Self { params, results }
    }

    pub fn parse(cconv: &str) -> Result<Self, VmError> {
        let invalid = || VmError::InvalidModule(format!("invalid calling convention '{}'", cconv));
        let body = cconv.strip_prefix('0').ok_or_else(invalid)?;
        let (params, results) = body.split_once('_').ok_or_else(invalid)?;
        let side = |s: &str| -> Result<Vec<ValueType>, VmError> {
            if s == "v" {
                return Ok(Vec::new());
            }
            if s.is_empty() {
                return Err(invalid());
            }
            s.chars()
                .map(|c| ValueType::from_cconv_char(c).ok_or_else(invalid))
                .collect()
        };
        Ok(Self {
            params: side(params)?,
            results: side(results)?,
        })
    }

    /// Check `values` against `types`, position by position.
    pub fn check_values(types: &[ValueType], values: &[Value], what: &str) -> Result<(), VmError> {
        if types.len() != values.len() {
            return Err(VmError::type_mismatch(
                format!("{} {}", types.len(), what),
                format!("{} {}", values.len(), what),
            ));
        }
        for (i, (ty, value)) in types.iter().zip(values).enumerate() {
            if value.value_type() != *ty {
                return Err(VmError::type_mismatch(
                    format!("{} {} of type {}", what, i, ty),
                    value.value_type().to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn side(f: &mut fmt::Formatter<'_>, types: &[ValueType]) -> fmt::Result {
            if types.is_empty() {
                return write!(f, "v");
            }
            for ty in types {
                write!(f, "{}", ty.cconv_char())?;
            }
            Ok(())
        }
        write!(f, "0")?;
        side(f, &self.params)?;
        write!(f, "_")?;
        side(f, &self.results)
    }
}

impl FromStr for Signature {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}
