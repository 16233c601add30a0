use super::helpers::{context, invoke};
use crate::binary::{from_bytes, to_bytes, MAGIC};
use crate::builder::{FunctionBuilder, ModuleBuilder};
use crate::bytecode::{BytecodeModule, Constant};
use crate::bytecode_debug::disassemble_module;
use crate::error::VmError;
use crate::opcode::OpCode;
use kiln_types::{Value, ValueType};

fn sample_module() -> BytecodeModule {
    let mut m = ModuleBuilder::new("sample");
    m.version(7);
    m.optional_import("host", "log", "0r_v").unwrap();
    let scale = m.constant(Constant::F64(2.5)).unwrap();
    m.constant(Constant::I64(-3)).unwrap();
    m.string("overflow").unwrap();
    m.rodata(&[0xde, 0xad]).unwrap();
    m.global(ValueType::F64).unwrap();

    let mut f = FunctionBuilder::new("scale", "0F_F").unwrap();
    f.registers(2)
        .abx(OpCode::LoadConst, 1, scale)
        .abc(OpCode::Mul, 0, 0, 1)
        .ret(0);
    let ordinal = m.function(f).unwrap();
    m.export("scale", ordinal);
    m.build().unwrap()
}

#[test]
fn test_decoded_module_matches_and_runs() {
    let module = sample_module();
    let bytes = to_bytes(&module).unwrap();
    assert_eq!(&bytes[..8], MAGIC);

    let decoded = from_bytes(&bytes).unwrap();
    assert_eq!(decoded.version, 7);
    assert_eq!(decoded.imports[0].full_name(), "host.log");
    assert!(decoded.imports[0].optional);
    assert_eq!(disassemble_module(&decoded), disassemble_module(&module));

    let ctx = context(vec![decoded.into()]);
    assert_eq!(
        invoke(&ctx, "sample.scale", vec![Value::F64(4.0)]).unwrap(),
        vec![Value::F64(10.0)]
    );
}

#[test]
fn test_bad_magic_rejected() {
    let mut bytes = to_bytes(&sample_module()).unwrap();
    bytes[0] = b'X';
    assert!(matches!(from_bytes(&bytes), Err(VmError::InvalidModule(_))));
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = to_bytes(&sample_module()).unwrap();
    bytes.push(0);
    assert!(matches!(from_bytes(&bytes), Err(VmError::InvalidModule(_))));
}

#[test]
fn test_unsupported_major_version_rejected() {
    let mut bytes = to_bytes(&sample_module()).unwrap();
    bytes[8..10].copy_from_slice(&99u16.to_le_bytes());
    assert!(matches!(from_bytes(&bytes), Err(VmError::InvalidModule(_))));
}

#[test]
fn test_truncated_input_rejected() {
    let bytes = to_bytes(&sample_module()).unwrap();
    for len in [0, 8, 12, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            matches!(from_bytes(&bytes[..len]), Err(VmError::InvalidModule(_))),
            "prefix of {} bytes decoded",
            len
        );
    }
}

#[test]
fn test_decoder_runs_verifier() {
    let mut module = sample_module();
    let mut function = (*module.functions[0]).clone();
    function.code[0] = crate::opcode::instruction::encode_abx(OpCode::LoadConst.as_u8(), 1, 40);
    module.functions[0] = function.into();
    let bytes = to_bytes(&module).unwrap();
    assert!(matches!(from_bytes(&bytes), Err(VmError::InvalidModule(_))));
}
