//! Command buffer recording.
//!
//! A command buffer is written by one recorder, append-only, between a single
//! `begin` and a single `end`. Once ended it is immutable and may be
//! submitted any number of times.

use crate::buffer::Buffer;
use crate::error::{HalError, HalResult};
use crate::executable::{DescriptorSet, Executable, ExecutableLayout};
use bitflags::bitflags;
use kiln_types::sync::{Arc, Mutex};
use kiln_types::{Resource, ResourceKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CommandBufferMode: u32 {
        /// Submitted at most once
        const ONE_SHOT = 1 << 0;
        /// May be executed on the submitting thread
        const ALLOW_INLINE_EXECUTION = 1 << 4;
    }
}

bitflags! {
    /// Classes of commands a buffer may record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CommandCategory: u32 {
        const TRANSFER = 1 << 0;
        const DISPATCH = 1 << 1;
    }
}

/// Host-visible event toggled by command buffers
#[derive(Debug, Default)]
pub struct Event {
    signaled: AtomicBool,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

impl Resource for Event {
    const KIND: ResourceKind = ResourceKind::Event;
}

/// One recorded command
#[derive(Debug, Clone)]
pub enum Command {
    FillBuffer {
        target: Arc<Buffer>,
        offset: usize,
        length: usize,
        pattern: Vec<u8>,
    },
    CopyBuffer {
        source: Arc<Buffer>,
        source_offset: usize,
        target: Arc<Buffer>,
        target_offset: usize,
        length: usize,
    },
    UpdateBuffer {
        data: Vec<u8>,
        target: Arc<Buffer>,
        offset: usize,
    },
    ExecutionBarrier,
    SignalEvent(Arc<Event>),
    ResetEvent(Arc<Event>),
    PushConstants {
        layout: Arc<ExecutableLayout>,
        offset: usize,
        values: Vec<u32>,
    },
    BindDescriptorSet {
        layout: Arc<ExecutableLayout>,
        set: u32,
        descriptor_set: Arc<DescriptorSet>,
    },
    Dispatch {
        executable: Arc<Executable>,
        entry_point: u32,
        workgroups: [u32; 3],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Initial,
    Recording,
    Finalized,
}

#[derive(Debug)]
struct Recording {
    state: RecordingState,
    commands: Vec<Command>,
}

#[derive(Debug)]
pub struct CommandBuffer {
    mode: CommandBufferMode,
    categories: CommandCategory,
    recording: Mutex<Recording>,
}

impl CommandBuffer {
    pub fn new(mode: CommandBufferMode, categories: CommandCategory) -> Self {
        Self {
            mode,
            categories,
            recording: Mutex::new(Recording {
                state: RecordingState::Initial,
                commands: Vec::new(),
            }),
        }
    }

    pub fn mode(&self) -> CommandBufferMode {
        self.mode
    }

    pub fn categories(&self) -> CommandCategory {
        self.categories
    }

    pub fn state(&self) -> RecordingState {
        self.recording.lock().state
    }

    pub fn is_finalized(&self) -> bool {
        self.state() == RecordingState::Finalized
    }

    pub fn begin(&self) -> HalResult<()> {
        let mut recording = self.recording.lock();
        if recording.state != RecordingState::Initial {
            return Err(HalError::FailedPrecondition(
                "command buffer already began recording".to_string(),
            ));
        }
        recording.state = RecordingState::Recording;
        Ok(())
    }

    pub fn end(&self) -> HalResult<()> {
        let mut recording = self.recording.lock();
        if recording.state != RecordingState::Recording {
            return Err(HalError::FailedPrecondition(format!(
                "command buffer end while {:?}",
                recording.state
            )));
        }
        recording.state = RecordingState::Finalized;
        Ok(())
    }

    /// Recorded commands; only available once finalized.
    pub fn commands(&self) -> HalResult<Vec<Command>> {
        let recording = self.recording.lock();
        if recording.state != RecordingState::Finalized {
            return Err(HalError::FailedPrecondition(
                "command buffer not finalized".to_string(),
            ));
        }
        Ok(recording.commands.clone())
    }

    pub fn fill_buffer(
        &self,
        target: Arc<Buffer>,
        offset: usize,
        length: usize,
        pattern: Vec<u8>,
    ) -> HalResult<()> {
        if !matches!(pattern.len(), 1 | 2 | 4) {
            return Err(HalError::InvalidArgument(format!(
                "fill pattern length {}",
                pattern.len()
            )));
        }
        self.record(
            CommandCategory::TRANSFER,
            Command::FillBuffer {
                target,
                offset,
                length,
                pattern,
            },
        )
    }

    pub fn copy_buffer(
        &self,
        source: Arc<Buffer>,
        source_offset: usize,
        target: Arc<Buffer>,
        target_offset: usize,
        length: usize,
    ) -> HalResult<()> {
        self.record(
            CommandCategory::TRANSFER,
            Command::CopyBuffer {
                source,
                source_offset,
                target,
                target_offset,
                length,
            },
        )
    }

    pub fn update_buffer(&self, data: Vec<u8>, target: Arc<Buffer>, offset: usize) -> HalResult<()> {
        self.record(
            CommandCategory::TRANSFER,
            Command::UpdateBuffer {
                data,
                target,
                offset,
            },
        )
    }

    pub fn execution_barrier(&self) -> HalResult<()> {
        self.record(CommandCategory::empty(), Command::ExecutionBarrier)
    }

    pub fn signal_event(&self, event: Arc<Event>) -> HalResult<()> {
        self.record(CommandCategory::empty(), Command::SignalEvent(event))
    }

    pub fn reset_event(&self, event: Arc<Event>) -> HalResult<()> {
        self.record(CommandCategory::empty(), Command::ResetEvent(event))
    }

    pub fn push_constants(
        &self,
        layout: Arc<ExecutableLayout>,
        offset: usize,
        values: Vec<u32>,
    ) -> HalResult<()> {
        if offset + values.len() > layout.push_constants() {
            return Err(HalError::OutOfRange(format!(
                "push constants [{}, +{}) exceed layout's {}",
                offset,
                values.len(),
                layout.push_constants()
            )));
        }
        self.record(
            CommandCategory::DISPATCH,
            Command::PushConstants {
                layout,
                offset,
                values,
            },
        )
    }

    pub fn bind_descriptor_set(
        &self,
        layout: Arc<ExecutableLayout>,
        set: u32,
        descriptor_set: Arc<DescriptorSet>,
    ) -> HalResult<()> {
        let expected = layout.set_layouts().get(set as usize).ok_or_else(|| {
            HalError::OutOfRange(format!(
                "set {} of {}",
                set,
                layout.set_layouts().len()
            ))
        })?;
        if !Arc::ptr_eq(expected, descriptor_set.layout()) {
            return Err(HalError::InvalidArgument(format!(
                "descriptor set does not match layout of set {}",
                set
            )));
        }
        self.record(
            CommandCategory::DISPATCH,
            Command::BindDescriptorSet {
                layout,
                set,
                descriptor_set,
            },
        )
    }

    pub fn dispatch(
        &self,
        executable: Arc<Executable>,
        entry_point: u32,
        workgroups: [u32; 3],
    ) -> HalResult<()> {
        executable.entry_point(entry_point)?;
        self.record(
            CommandCategory::DISPATCH,
            Command::Dispatch {
                executable,
                entry_point,
                workgroups,
            },
        )
    }

    fn record(&self, category: CommandCategory, command: Command) -> HalResult<()> {
        if !self.categories.contains(category) {
            return Err(HalError::InvalidArgument(format!(
                "command category {:?} not allowed in {:?} buffer",
                category, self.categories
            )));
        }
        let mut recording = self.recording.lock();
        if recording.state != RecordingState::Recording {
            return Err(HalError::FailedPrecondition(format!(
                "recording into command buffer while {:?}",
                recording.state
            )));
        }
        recording.commands.push(command);
        Ok(())
    }
}

impl Resource for CommandBuffer {
    const KIND: ResourceKind = ResourceKind::CommandBuffer;
}
