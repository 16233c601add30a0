//! Hardware abstraction layer for the Kiln runtime.
//!
//! The [`Device`] trait is the only seam the VM-side bridging module depends
//! on. [`local::LocalDevice`] is a host-memory implementation used by tests
//! and embedders without an accelerator.

pub mod allocator;
pub mod buffer;
pub mod command_buffer;
pub mod device;
pub mod error;
pub mod executable;
pub mod local;
pub mod semaphore;

// Re-exports
pub use allocator::Allocator;
pub use buffer::{Buffer, BufferUsage, BufferView, ElementType, EncodingType, MemoryType};
pub use command_buffer::{Command, CommandBuffer, CommandBufferMode, CommandCategory, Event};
pub use device::{Device, DeviceQuery, SubmissionBatch};
pub use error::{HalError, HalResult};
pub use executable::{
    DescriptorSet, DescriptorSetLayout, DispatchContext, Executable, ExecutableCache,
    ExecutableLayout, KernelFn, KernelTable, HOST_EXECUTABLE_FORMAT,
};
pub use local::{LocalDevice, LocalDeviceConfig, QueueMode};
pub use semaphore::{Fence, Semaphore, Timepoint, WaitResult};
