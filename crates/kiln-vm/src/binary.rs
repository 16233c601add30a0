//! Stable binary encoding of [`BytecodeModule`].
//!
//! Layout: magic `KILNVM\0\0`, `u16` major and minor version, then the
//! sections in order: name, version, imports, exports, constants, strings,
//! rodata, globals, functions. All integers are little-endian; strings and
//! blobs are `u32` length-prefixed. Decoding verifies the module and
//! rejects trailing bytes.

use crate::bytecode::{
    BytecodeModule, Constant, ExportDecl, FunctionPrototype, ImportDecl, MODULE_VERSION_MAJOR,
    MODULE_VERSION_MINOR,
};
use crate::error::VmError;
use crate::signature::Signature;
use crate::verify::verify_module;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use kiln_types::sync::Arc;
use kiln_types::ValueType;
use std::io::{Cursor, Read};

pub const MAGIC: &[u8; 8] = b"KILNVM\0\0";

const TAG_I32: u8 = 0;
const TAG_I64: u8 = 1;
const TAG_F32: u8 = 2;
const TAG_F64: u8 = 3;

fn type_code(ty: ValueType) -> u8 {
    match ty {
        ValueType::I32 => 0,
        ValueType::I64 => 1,
        ValueType::F32 => 2,
        ValueType::F64 => 3,
        ValueType::Ref => 4,
    }
}

fn type_from_code(code: u8) -> Option<ValueType> {
    match code {
        0 => Some(ValueType::I32),
        1 => Some(ValueType::I64),
        2 => Some(ValueType::F32),
        3 => Some(ValueType::F64),
        4 => Some(ValueType::Ref),
        _ => None,
    }
}

/// Serialize a module.
pub fn to_bytes(module: &BytecodeModule) -> Result<Vec<u8>, VmError> {
    let mut enc = Encoder { buf: Vec::new() };
    enc.buf.extend_from_slice(MAGIC);
    enc.u16(MODULE_VERSION_MAJOR);
    enc.u16(MODULE_VERSION_MINOR);

    enc.string(&module.name)?;
    enc.u32(module.version);

    enc.len(module.imports.len())?;
    for import in &module.imports {
        enc.string(&import.module)?;
        enc.string(&import.name)?;
        enc.string(&import.signature.to_string())?;
        enc.u8(import.optional as u8);
    }

    enc.len(module.exports.len())?;
    for export in &module.exports {
        enc.string(&export.name)?;
        enc.u16(export.function);
    }

    enc.len(module.constants.constants.len())?;
    for constant in &module.constants.constants {
        match *constant {
            Constant::I32(v) => {
                enc.u8(TAG_I32);
                enc.buf.write_i32::<LittleEndian>(v).map_err(io_err)?;
            }
            Constant::I64(v) => {
                enc.u8(TAG_I64);
                enc.buf.write_i64::<LittleEndian>(v).map_err(io_err)?;
            }
            Constant::F32(v) => {
                enc.u8(TAG_F32);
                enc.buf.write_f32::<LittleEndian>(v).map_err(io_err)?;
            }
            Constant::F64(v) => {
                enc.u8(TAG_F64);
                enc.buf.write_f64::<LittleEndian>(v).map_err(io_err)?;
            }
        }
    }

    enc.len(module.constants.strings.len())?;
    for s in &module.constants.strings {
        enc.string(s)?;
    }

    enc.len(module.rodata.len())?;
    for segment in &module.rodata {
        enc.blob(segment)?;
    }

    enc.len(module.globals.len())?;
    for ty in &module.globals {
        enc.u8(type_code(*ty));
    }

    enc.len(module.functions.len())?;
    for function in &module.functions {
        enc.string(&function.name)?;
        enc.string(&function.signature.to_string())?;
        enc.u16(function.register_count);
        enc.len(function.code.len())?;
        for &word in &function.code {
            enc.u32(word);
        }
    }

    Ok(enc.buf)
}

/// Decode and verify a module.
pub fn from_bytes(bytes: &[u8]) -> Result<BytecodeModule, VmError> {
    let mut dec = Decoder {
        cursor: Cursor::new(bytes),
    };

    let mut magic = [0u8; 8];
    dec.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(dec.err("bad magic"));
    }
    let major = dec.u16()?;
    let minor = dec.u16()?;
    if major != MODULE_VERSION_MAJOR || minor > MODULE_VERSION_MINOR {
        return Err(dec.err(&format!(
            "unsupported module version {}.{} (expected {}.{})",
            major, minor, MODULE_VERSION_MAJOR, MODULE_VERSION_MINOR
        )));
    }

    let mut module = BytecodeModule::new(dec.string()?);
    module.version = dec.u32()?;

    for _ in 0..dec.u32()? {
        let module_name = dec.string()?;
        let name = dec.string()?;
        let signature = Signature::parse(&dec.string()?)?;
        let optional = dec.u8()? != 0;
        module.imports.push(ImportDecl {
            module: module_name,
            name,
            signature,
            optional,
        });
    }

    for _ in 0..dec.u32()? {
        let name = dec.string()?;
        let function = dec.u16()?;
        module.exports.push(ExportDecl { name, function });
    }

    for _ in 0..dec.u32()? {
        let constant = match dec.u8()? {
            TAG_I32 => Constant::I32(dec.read(|c| c.read_i32::<LittleEndian>())?),
            TAG_I64 => Constant::I64(dec.read(|c| c.read_i64::<LittleEndian>())?),
            TAG_F32 => Constant::F32(dec.read(|c| c.read_f32::<LittleEndian>())?),
            TAG_F64 => Constant::F64(dec.read(|c| c.read_f64::<LittleEndian>())?),
            tag => return Err(dec.err(&format!("unknown constant tag {}", tag))),
        };
        module.constants.constants.push(constant);
    }

    for _ in 0..dec.u32()? {
        let s = dec.string()?;
        module.constants.strings.push(s);
    }

    for _ in 0..dec.u32()? {
        let segment: Arc<[u8]> = dec.blob()?.into();
        module.rodata.push(segment);
    }

    for _ in 0..dec.u32()? {
        let code = dec.u8()?;
        let ty = type_from_code(code).ok_or_else(|| dec.err(&format!("unknown type {}", code)))?;
        module.globals.push(ty);
    }

    for _ in 0..dec.u32()? {
        let name = dec.string()?;
        let signature = Signature::parse(&dec.string()?)?;
        let mut function = FunctionPrototype::new(name, signature);
        function.register_count = dec.u16()?;
        let count = dec.u32()? as usize;
        dec.check_remaining(count.saturating_mul(4))?;
        for _ in 0..count {
            let word = dec.u32()?;
            function.add_instruction(word);
        }
        module.functions.push(Arc::new(function));
    }

    if dec.remaining() != 0 {
        return Err(dec.err("trailing bytes"));
    }
    verify_module(&module)?;
    Ok(module)
}

fn io_err(err: std::io::Error) -> VmError {
    VmError::InvalidModule(format!("encode error: {}", err))
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn len(&mut self, len: usize) -> Result<(), VmError> {
        let len = u32::try_from(len)
            .map_err(|_| VmError::InvalidModule("length overflow".to_string()))?;
        self.u32(len);
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<(), VmError> {
        self.blob(s.as_bytes())
    }

    fn blob(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        self.len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    fn err(&self, message: &str) -> VmError {
        VmError::InvalidModule(format!(
            "decode error at {}: {}",
            self.cursor.position(),
            message
        ))
    }

    fn io(&self, err: std::io::Error) -> VmError {
        self.err(&err.to_string())
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn check_remaining(&self, needed: usize) -> Result<(), VmError> {
        if needed > self.remaining() {
            return Err(self.err("unexpected end of data"));
        }
        Ok(())
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Result<(), VmError> {
        self.check_remaining(out.len())?;
        self.cursor.read_exact(out).map_err(|e| self.io(e))
    }

    fn read<T>(
        &mut self,
        f: impl FnOnce(&mut Cursor<&'a [u8]>) -> std::io::Result<T>,
    ) -> Result<T, VmError> {
        f(&mut self.cursor).map_err(|e| self.io(e))
    }

    fn u8(&mut self) -> Result<u8, VmError> {
        self.read(|c| c.read_u8())
    }

    fn u16(&mut self) -> Result<u16, VmError> {
        self.read(|c| c.read_u16::<LittleEndian>())
    }

    fn u32(&mut self) -> Result<u32, VmError> {
        self.read(|c| c.read_u32::<LittleEndian>())
    }

    fn blob(&mut self) -> Result<Vec<u8>, VmError> {
        let len = self.u32()? as usize;
        self.check_remaining(len)?;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn string(&mut self) -> Result<String, VmError> {
        let bytes = self.blob()?;
        String::from_utf8(bytes).map_err(|_| self.err("invalid utf-8 string"))
    }
}
