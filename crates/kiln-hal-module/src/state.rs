//! Per-context state of the `hal` module.

use crate::HalModuleFlags;
use kiln_hal::Device;
use kiln_types::sync::Arc;
use kiln_types::Ref;
use kiln_vm::ModuleStateRef;
use std::fmt;

/// Device binding shared by every call made within one context
pub struct HalModuleState {
    pub(crate) device: Arc<dyn Device>,
    /// The device registered in the context's registry
    pub(crate) device_ref: Ref,
    pub(crate) flags: HalModuleFlags,
}

impl HalModuleState {
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn device_ref(&self) -> &Ref {
        &self.device_ref
    }

    pub fn flags(&self) -> HalModuleFlags {
        self.flags
    }

    pub fn is_synchronous(&self) -> bool {
        self.flags.contains(HalModuleFlags::SYNCHRONOUS)
    }
}

impl fmt::Debug for HalModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalModuleState")
            .field("device", &self.device.id())
            .field("device_ref", &self.device_ref)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Device bound to a `hal` module state; `None` for any other state.
pub fn state_device(state: &ModuleStateRef) -> Option<Arc<dyn Device>> {
    state
        .native::<HalModuleState>()
        .map(|state| state.device.clone())
}
