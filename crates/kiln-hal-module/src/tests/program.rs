//! Bytecode driving the device through `hal` imports.

use super::helpers::harness_with;
use crate::{create_hal_module, HalModuleFlags};
use kiln_hal::{LocalDevice, LocalDeviceConfig, MemoryType, QueueMode, Semaphore};
use kiln_types::sync::Arc;
use kiln_types::Value;
use kiln_vm::{
    Constant, Fiber, FunctionBuilder, Instance, Module, ModuleBuilder, OpCode, Outcome,
    SuspensionController, VmError, WaitCondition,
};

/// `app.roundtrip() -> i32`: allocate 16 bytes, store 77 at offset 4 and
/// load it back.
/// `app.wait(semaphore, value) -> i32`: await with no timeout, add 1000.
fn app_module() -> Module {
    let mut m = ModuleBuilder::new("app");
    let shared_device = m.import("hal", "ex.shared_device", "0v_r").unwrap();
    let allocate = m.import("hal", "allocator.allocate", "0riiI_r").unwrap();
    let store = m.import("hal", "buffer.store", "0irIi_v").unwrap();
    let load = m.import("hal", "buffer.load", "0rIi_i").unwrap();
    let await_value = m.import("hal", "semaphore.await", "0rII_i").unwrap();
    let size = m.constant(Constant::I64(16)).unwrap();
    let offset = m.constant(Constant::I64(4)).unwrap();
    let forever = m.constant(Constant::I64(-1)).unwrap();

    let mut f = FunctionBuilder::new("roundtrip", "0v_i").unwrap();
    f.registers(6)
        .call_import(1, shared_device)
        .load_i32(2, MemoryType::HOST_LOCAL.bits() as i16)
        .load_i32(3, 7)
        .abx(OpCode::LoadConst, 4, size)
        .call_import(1, allocate)
        .load_i32(2, 77)
        .mov(3, 1)
        .abx(OpCode::LoadConst, 4, offset)
        .load_i32(5, 4)
        .call_import(2, store)
        .mov(2, 1)
        .abx(OpCode::LoadConst, 3, offset)
        .load_i32(4, 4)
        .call_import(2, load)
        .ret(2);
    let ordinal = m.function(f).unwrap();
    m.export("roundtrip", ordinal);

    let mut f = FunctionBuilder::new("wait", "0rI_i").unwrap();
    f.registers(4)
        .abx(OpCode::LoadConst, 2, forever)
        .call_import(0, await_value)
        .load_i32(3, 1000)
        .abc(OpCode::Add, 0, 0, 3)
        .ret(0);
    let ordinal = m.function(f).unwrap();
    m.export("wait", ordinal);

    m.build().unwrap().into()
}

#[test]
fn test_bytecode_buffer_roundtrip() {
    let h = harness_with(QueueMode::Inline, HalModuleFlags::empty(), vec![app_module()]);
    let results = h.ctx.invoke("app.roundtrip", vec![]).unwrap();
    assert_eq!(results.into_values().unwrap(), vec![Value::I32(77)]);
    // Only the device entry survives the call
    assert_eq!(h.ctx.registry().live_count(), 1);
}

#[test]
fn test_bytecode_resumes_after_hal_wait() {
    let h = harness_with(QueueMode::Inline, HalModuleFlags::empty(), vec![app_module()]);
    let sem = h.call_one("semaphore.create", vec![h.device_ref(), Value::I64(0)]);
    let object = sem.as_resource().unwrap().resolve::<Semaphore>().unwrap();

    let mut controller = SuspensionController::new();
    let fiber = Fiber::new(&h.ctx, "app.wait", vec![sem, Value::I64(1)]).unwrap();
    let Outcome::Suspended(_) = controller.run(fiber).unwrap() else {
        panic!("wait should suspend");
    };

    object.signal(1).unwrap();
    controller.notify(&WaitCondition::semaphore(object, 1, None));
    let mut resumed = controller.poll();
    match resumed.remove(0).outcome {
        Ok(Outcome::Returned(list)) => {
            assert_eq!(list.into_values().unwrap(), vec![Value::I32(1000)])
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_import_signature_checked_against_hal() {
    let mut m = ModuleBuilder::new("bad");
    m.import("hal", "buffer.length", "0r_i").unwrap();
    let f = FunctionBuilder::new("noop", "0v_v").unwrap();
    let ordinal = m.function(f).unwrap();
    m.export("noop", ordinal);
    let module: Module = m.build().unwrap().into();

    let device = Arc::new(LocalDevice::new(LocalDeviceConfig::default()).unwrap());
    let hal = create_hal_module(device, HalModuleFlags::empty()).unwrap();
    let err = Instance::default()
        .create_context(vec![module, hal])
        .unwrap_err();
    assert!(matches!(err, VmError::InvalidModule(_)), "{:?}", err);
}
