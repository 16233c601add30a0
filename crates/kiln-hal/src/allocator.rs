//! Buffer allocator handed out by a device.

use crate::buffer::{Buffer, BufferUsage, MemoryType};
use crate::device::Device;
use crate::error::{HalError, HalResult};
use kiln_types::sync::Arc;
use kiln_types::{Resource, ResourceKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Allocates buffers from one device's memory.
pub struct Allocator {
    device: Arc<dyn Device>,
    allocated_bytes: AtomicU64,
    allocations: AtomicU64,
}

impl Allocator {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            allocated_bytes: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn allocate(
        &self,
        memory_type: MemoryType,
        usage: BufferUsage,
        byte_length: usize,
    ) -> HalResult<Buffer> {
        if memory_type.is_empty() {
            return Err(HalError::InvalidArgument(
                "allocation needs at least one memory type".to_string(),
            ));
        }
        let buffer = self.device.allocate_buffer(memory_type, usage, byte_length)?;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes
            .fetch_add(byte_length as u64, Ordering::Relaxed);
        trace!(device = %self.device.id(), byte_length, "buffer allocated");
        Ok(buffer)
    }

    /// Total bytes handed out, including buffers since released
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("device", &self.device.id())
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

impl Resource for Allocator {
    const KIND: ResourceKind = ResourceKind::Allocator;
}
