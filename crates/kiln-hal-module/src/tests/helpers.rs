//! Contexts with the `hal` module loaded over a local device.

use crate::{create_hal_module, HalModuleFlags};
use kiln_hal::{LocalDevice, LocalDeviceConfig, MemoryType, QueueMode};
use kiln_types::sync::Arc;
use kiln_types::{SharedList, TypedList, Value};
use kiln_vm::{Context, Instance, Module, VmConfig, VmError};

pub struct Harness {
    pub ctx: Arc<Context>,
    pub device: Arc<LocalDevice>,
}

pub fn harness(queue_mode: QueueMode, flags: HalModuleFlags) -> Harness {
    harness_with(queue_mode, flags, Vec::new())
}

/// Load `hal` after `modules` so bytecode can import it
pub fn harness_with(queue_mode: QueueMode, flags: HalModuleFlags, mut modules: Vec<Module>) -> Harness {
    let device = Arc::new(
        LocalDevice::new(LocalDeviceConfig {
            queue_mode,
            ..Default::default()
        })
        .unwrap(),
    );
    modules.push(create_hal_module(device.clone(), flags).unwrap());
    let ctx = Instance::new(VmConfig::default())
        .create_context(modules)
        .unwrap();
    Harness { ctx, device }
}

impl Harness {
    /// Call the `hal` export `name` as a fiber entry point
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Vec<Value>, VmError> {
        let list = self.ctx.invoke(&format!("hal.{}", name), args)?;
        Ok(list.into_values()?)
    }

    pub fn call_one(&self, name: &str, args: Vec<Value>) -> Value {
        let mut results = self.call(name, args).unwrap();
        assert_eq!(results.len(), 1, "{} results", name);
        results.remove(0)
    }

    pub fn device_ref(&self) -> Value {
        self.call_one("ex.shared_device", vec![])
    }

    pub fn buffer(&self, size: i64) -> Value {
        self.call_one(
            "allocator.allocate",
            vec![
                self.device_ref(),
                Value::I32(MemoryType::HOST_LOCAL.bits() as i32),
                Value::I32(7),
                Value::I64(size),
            ],
        )
    }

    /// Register a variant list holding `values`
    pub fn list(&self, values: Vec<Value>) -> Value {
        let list = SharedList::new(TypedList::from_values(values));
        Value::Ref(Some(self.ctx.registry().register_ref(Arc::new(list)).unwrap()))
    }

    pub fn load(&self, buffer: &Value, offset: i64) -> i32 {
        let value = self.call_one(
            "buffer.load",
            vec![buffer.clone(), Value::I64(offset), Value::I32(4)],
        );
        value.as_i32().unwrap()
    }
}
