use super::helpers::{context, invoke};
use crate::builder::{FunctionBuilder, ModuleBuilder};
use crate::context::Instance;
use crate::error::{TrapKind, VmError};
use crate::module::Module;
use crate::native::{NativeCall, NativeModule, NativeOutcome};
use crate::opcode::instruction::encode_asbx;
use crate::opcode::OpCode;
use kiln_types::Value;
use std::sync::atomic::{AtomicI32, Ordering};

fn math_module() -> Module {
    let mut m = ModuleBuilder::new("math");
    let mut add = FunctionBuilder::new("add", "0ii_i").unwrap();
    add.abc(OpCode::Add, 0, 0, 1).ret(0);
    let add = m.function(add).unwrap();
    m.export("add", add);
    m.build().unwrap().into()
}

fn app_module(cconv: &str) -> Module {
    let mut m = ModuleBuilder::new("app");
    let add = m.import("math", "add", cconv).unwrap();
    let mut main = FunctionBuilder::new("main", "0v_i").unwrap();
    main.registers(2)
        .load_i32(0, 2)
        .load_i32(1, 3)
        .call_import(0, add)
        .ret(0);
    let main = m.function(main).unwrap();
    m.export("main", main);
    m.build().unwrap().into()
}

fn twice(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let x = args[0].as_i32().unwrap_or_default();
    Ok(NativeOutcome::values([Value::I32(x * 2)]))
}

fn next(call: &NativeCall<'_>, _args: &[Value]) -> Result<NativeOutcome, VmError> {
    let counter = call.state::<AtomicI32>()?;
    Ok(NativeOutcome::values([Value::I32(counter.fetch_add(1, Ordering::SeqCst))]))
}

fn host_module() -> Module {
    NativeModule::builder("host")
        .function("twice", "0i_i", twice)
        .and_then(|b| b.function("next", "0v_i", next))
        .unwrap()
        .state(|_| Ok(Box::new(AtomicI32::new(0))))
        .build()
        .into()
}

#[test]
fn test_cross_module_add() {
    let ctx = context(vec![app_module("0ii_i"), math_module()]);
    assert_eq!(invoke(&ctx, "app.main", vec![]).unwrap(), vec![Value::I32(5)]);
    assert_eq!(ctx.registry().live_count(), 0);
}

#[test]
fn test_import_signature_mismatch_fails_load() {
    let err = Instance::default()
        .create_context(vec![app_module("0ii_I"), math_module()])
        .unwrap_err();
    assert!(matches!(err, VmError::InvalidModule(_)));
}

#[test]
fn test_missing_required_import_fails_load() {
    let err = Instance::default()
        .create_context(vec![app_module("0ii_i")])
        .unwrap_err();
    assert!(matches!(err, VmError::InvalidModule(_)));
}

#[test]
fn test_duplicate_module_names_rejected() {
    let err = Instance::default()
        .create_context(vec![math_module(), math_module()])
        .unwrap_err();
    assert!(matches!(err, VmError::InvalidModule(_)));
}

#[test]
fn test_corrupt_module_rejected_at_load() {
    let mut module = ModuleBuilder::new("bad");
    let mut main = FunctionBuilder::new("main", "0v_v").unwrap();
    main.ret(0);
    let ordinal = module.function(main).unwrap();
    module.export("main", ordinal);
    let mut module = module.build().unwrap();

    // Branch far before the start of the function
    let mut function = (*module.functions[0]).clone();
    function.code.insert(0, encode_asbx(OpCode::Jump.as_u8(), 0, -100));
    module.functions[0] = function.into();

    let err = Instance::default()
        .create_context(vec![module.into()])
        .unwrap_err();
    assert!(matches!(err, VmError::InvalidModule(_)), "{:?}", err);
}

#[test]
fn test_unresolved_optional_import_traps_when_called() {
    let mut m = ModuleBuilder::new("app");
    let missing = m.optional_import("missing", "f", "0v_v").unwrap();
    let mut main = FunctionBuilder::new("main", "0v_v").unwrap();
    main.call_import(0, missing).ret(0);
    let main = m.function(main).unwrap();
    m.export("main", main);

    let ctx = context(vec![m.build().unwrap().into()]);
    let err = invoke(&ctx, "app.main", vec![]).unwrap_err();
    assert_eq!(
        err,
        VmError::Trap(TrapKind::UnresolvedImport("missing.f".to_string()))
    );
}

#[test]
fn test_bytecode_calls_native_import() {
    let mut m = ModuleBuilder::new("app");
    let twice = m.import("host", "twice", "0i_i").unwrap();
    let mut main = FunctionBuilder::new("main", "0i_i").unwrap();
    main.call_import(0, twice).call_import(0, twice).ret(0);
    let main = m.function(main).unwrap();
    m.export("main", main);

    let ctx = context(vec![m.build().unwrap().into(), host_module()]);
    assert_eq!(
        invoke(&ctx, "app.main", vec![Value::I32(5)]).unwrap(),
        vec![Value::I32(20)]
    );
}

#[test]
fn test_native_export_as_entry_point() {
    let ctx = context(vec![host_module()]);
    assert_eq!(
        invoke(&ctx, "host.twice", vec![Value::I32(4)]).unwrap(),
        vec![Value::I32(8)]
    );
}

#[test]
fn test_native_state_is_per_context() {
    let first = context(vec![host_module()]);
    let second = context(vec![host_module()]);
    assert_eq!(invoke(&first, "host.next", vec![]).unwrap(), vec![Value::I32(0)]);
    assert_eq!(invoke(&first, "host.next", vec![]).unwrap(), vec![Value::I32(1)]);
    assert_eq!(invoke(&second, "host.next", vec![]).unwrap(), vec![Value::I32(0)]);
}

#[test]
fn test_lookup_unknown_function() {
    let ctx = context(vec![math_module()]);
    assert!(ctx.lookup_function("math.sub").is_err());
    assert!(ctx.lookup_function("nodot").is_err());
    let f = ctx.lookup_function("math.add").unwrap();
    assert_eq!(f.signature.to_string(), "0ii_i");
}
