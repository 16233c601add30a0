//! The device interface the runtime is written against.

use crate::buffer::{Buffer, BufferUsage, MemoryType};
use crate::command_buffer::{CommandBuffer, CommandBufferMode, CommandCategory, Event};
use crate::error::{HalError, HalResult};
use crate::executable::ExecutableCache;
use crate::semaphore::{Fence, Semaphore, WaitResult};
use kiln_types::sync::Arc;
use kiln_types::{Resource, ResourceKind};
use std::fmt;
use std::time::Duration;

/// Integer-keyed device properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DeviceQuery {
    /// Number of submission queues
    QueueCount = 0,
    /// Largest single allocation in bytes
    MaxAllocationSize = 1,
    /// Kernels registered for host executables
    KernelCount = 2,
    /// Batches submitted so far
    SubmissionCount = 3,
}

impl DeviceQuery {
    pub fn from_key(key: i32) -> Option<Self> {
        match key {
            0 => Some(DeviceQuery::QueueCount),
            1 => Some(DeviceQuery::MaxAllocationSize),
            2 => Some(DeviceQuery::KernelCount),
            3 => Some(DeviceQuery::SubmissionCount),
            _ => None,
        }
    }
}

/// One queue submission: wait, execute in order, then signal.
#[derive(Debug, Clone, Default)]
pub struct SubmissionBatch {
    pub wait: Fence,
    pub command_buffers: Vec<Arc<CommandBuffer>>,
    pub signal: Fence,
}

impl SubmissionBatch {
    /// Reject batches holding command buffers that are still recording
    pub fn validate(&self) -> HalResult<()> {
        for (i, cb) in self.command_buffers.iter().enumerate() {
            if !cb.is_finalized() {
                return Err(HalError::FailedPrecondition(format!(
                    "command buffer {} submitted before end",
                    i
                )));
            }
        }
        Ok(())
    }
}

/// A HAL device.
///
/// Objects created by a device are plain values; callers wrap them in
/// `Arc` and register them as resources.
pub trait Device: Send + Sync + fmt::Debug {
    /// Stable identifier, e.g. `local-inline`
    fn id(&self) -> &str;

    fn allocate_buffer(
        &self,
        memory_type: MemoryType,
        usage: BufferUsage,
        byte_length: usize,
    ) -> HalResult<Buffer>;

    fn create_command_buffer(
        &self,
        mode: CommandBufferMode,
        categories: CommandCategory,
    ) -> HalResult<CommandBuffer> {
        Ok(CommandBuffer::new(mode, categories))
    }

    fn create_semaphore(&self, initial_value: u64) -> HalResult<Semaphore> {
        Ok(Semaphore::new(initial_value))
    }

    fn create_event(&self) -> HalResult<Event> {
        Ok(Event::new())
    }

    fn create_executable_cache(&self) -> HalResult<ExecutableCache>;

    /// Queue `batch`. Completion is observed through its signal fence;
    /// a failing batch fails the signal semaphores.
    fn queue_submit(&self, batch: SubmissionBatch) -> HalResult<()>;

    fn wait_semaphore(
        &self,
        semaphore: &Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> HalResult<WaitResult> {
        semaphore.wait(value, timeout)
    }

    /// `None` when the key is not understood by this device
    fn query_i64(&self, key: DeviceQuery) -> HalResult<Option<i64>>;
}

impl Resource for dyn Device {
    const KIND: ResourceKind = ResourceKind::Device;
}
