//! Host-memory reference device.
//!
//! Buffers are plain host allocations and executables link against a table
//! of Rust kernels registered with [`LocalDevice::register_kernel`].

mod queue;

use crate::buffer::{Buffer, BufferUsage, MemoryType};
use crate::device::{Device, DeviceQuery, SubmissionBatch};
use crate::error::{HalError, HalResult};
use crate::executable::{DispatchContext, ExecutableCache, KernelTable};
use queue::Queue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// How submissions are executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// On the submitting thread, before `queue_submit` returns. Submissions
    /// whose wait fence is not yet reached are rejected.
    #[default]
    Inline,
    /// On a dedicated worker thread
    Threaded,
    /// Only when the host calls [`LocalDevice::run_pending`]
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDeviceConfig {
    pub queue_mode: QueueMode,
    /// Largest single allocation in bytes
    pub max_buffer_size: usize,
}

impl Default for LocalDeviceConfig {
    fn default() -> Self {
        Self {
            queue_mode: QueueMode::Inline,
            max_buffer_size: 1 << 30,
        }
    }
}

pub struct LocalDevice {
    id: String,
    config: LocalDeviceConfig,
    kernels: KernelTable,
    queue: Queue,
    submissions: AtomicU64,
}

impl LocalDevice {
    pub fn new(config: LocalDeviceConfig) -> HalResult<Self> {
        let id = match config.queue_mode {
            QueueMode::Inline => "local-inline",
            QueueMode::Threaded => "local-threaded",
            QueueMode::Manual => "local-manual",
        }
        .to_string();
        let queue = match config.queue_mode {
            QueueMode::Inline => Queue::Inline,
            QueueMode::Threaded => Queue::threaded(&id)?,
            QueueMode::Manual => Queue::Manual {
                pending: Default::default(),
            },
        };
        debug!(device = %id, max_buffer_size = config.max_buffer_size, "created local device");
        Ok(Self {
            id,
            config,
            kernels: KernelTable::new(),
            queue,
            submissions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &LocalDeviceConfig {
        &self.config
    }

    /// Make `kernel` available to executables under `name`
    pub fn register_kernel<F>(&self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&DispatchContext<'_>) -> HalResult<()> + Send + Sync + 'static,
    {
        self.kernels.register(name, kernel);
    }

    /// Execute queued batches (manual mode). Returns how many ran.
    pub fn run_pending(&self) -> usize {
        self.queue.run_pending()
    }

    /// Batches waiting for `run_pending`
    pub fn pending_batches(&self) -> usize {
        self.queue.pending_count()
    }
}

impl fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDevice")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("kernels", &self.kernels)
            .finish()
    }
}

impl Device for LocalDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn allocate_buffer(
        &self,
        memory_type: MemoryType,
        usage: BufferUsage,
        byte_length: usize,
    ) -> HalResult<Buffer> {
        if byte_length > self.config.max_buffer_size {
            return Err(HalError::ResourceExhausted(format!(
                "allocation of {} bytes exceeds device limit {}",
                byte_length, self.config.max_buffer_size
            )));
        }
        Ok(Buffer::allocate(memory_type, usage, byte_length))
    }

    fn create_executable_cache(&self) -> HalResult<ExecutableCache> {
        Ok(ExecutableCache::new(self.kernels.clone()))
    }

    fn queue_submit(&self, batch: SubmissionBatch) -> HalResult<()> {
        batch.validate()?;
        let ordinal = self.submissions.fetch_add(1, Ordering::Relaxed);
        debug!(
            device = %self.id,
            ordinal,
            command_buffers = batch.command_buffers.len(),
            "queue submit"
        );
        self.queue.submit(batch)
    }

    fn query_i64(&self, key: DeviceQuery) -> HalResult<Option<i64>> {
        Ok(Some(match key {
            DeviceQuery::QueueCount => 1,
            DeviceQuery::MaxAllocationSize => self.config.max_buffer_size as i64,
            DeviceQuery::KernelCount => self.kernels.len() as i64,
            DeviceQuery::SubmissionCount => self.submissions.load(Ordering::Relaxed) as i64,
        }))
    }
}
