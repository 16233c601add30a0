//! The `hal` native module.
//!
//! Bytecode reaches a HAL device only through the exports registered here.
//! Every export resolves its ref arguments from the registry with a kind
//! check, forwards to the [`Device`] trait or the HAL object, and registers
//! the objects it creates. Calls that wait (`semaphore.await`, `fence.await`,
//! `ex.submit_and_wait`) either complete immediately, block the calling
//! thread under [`HalModuleFlags::SYNCHRONOUS`], or suspend the fiber.
//!
//! # Modules
//!
//! - `state`: per-context module state and the bound device
//! - `args`: argument decoding and wait handling shared by exports
//! - `lists`: typed-list helpers for buffer views
//! - `exports`: the export table, grouped by object type

use bitflags::bitflags;
use kiln_hal::Device;
use kiln_types::sync::Arc;
use kiln_vm::{Module, NativeModule, VmError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::debug;

mod args;
pub mod exports;
pub mod lists;
pub mod state;

pub use lists::{
    list_get_buffer_view_assign, list_get_buffer_view_retain, list_set_buffer_view_retain,
};
pub use state::{state_device, HalModuleState};

/// Name bytecode imports the module under
pub const MODULE_NAME: &str = "hal";

bitflags! {
    /// Construction flags for [`create_hal_module`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct HalModuleFlags: u32 {
        /// Block on waits instead of suspending the fiber
        const SYNCHRONOUS = 1 << 0;
    }
}

/// Create the `hal` module bound to `device`.
///
/// Each context the module is loaded into registers the device once and
/// shares it across all calls made in that context.
pub fn create_hal_module(device: Arc<dyn Device>, flags: HalModuleFlags) -> Result<Module, VmError> {
    debug!(device = %device.id(), ?flags, "creating hal module");
    let builder = exports::register_all(NativeModule::builder(MODULE_NAME))?;
    let module = builder
        .state(move |registry| {
            let device_ref = registry.register_ref::<dyn Device>(device.clone())?;
            let state: Box<dyn Any + Send + Sync> = Box::new(HalModuleState {
                device: device.clone(),
                device_ref,
                flags,
            });
            Ok(state)
        })
        .build();
    Ok(module.into())
}

#[cfg(test)]
mod tests;
