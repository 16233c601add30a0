//! Buffers, buffer views and their element metadata.

use crate::error::{HalError, HalResult};
use bitflags::bitflags;
use kiln_types::sync::{Arc, Mutex};
use kiln_types::{Resource, ResourceKind};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Where an allocation lives and how the host may see it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MemoryType: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
        const HOST_LOCAL = 1 << 3;
    }
}

bitflags! {
    /// Operations a buffer may participate in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BufferUsage: u32 {
        const TRANSFER = 1 << 0;
        const MAPPING = 1 << 1;
        const DISPATCH = 1 << 2;
    }
}

struct Allocation {
    bytes: Mutex<Vec<u8>>,
}

/// A range of device memory.
///
/// Subspans share the parent's allocation; all access is range-checked
/// against the span, never the allocation.
pub struct Buffer {
    allocation: Arc<Allocation>,
    byte_offset: usize,
    byte_length: usize,
    memory_type: MemoryType,
    usage: BufferUsage,
}

impl Buffer {
    /// Allocate zero-filled host memory backing a buffer
    pub fn allocate(memory_type: MemoryType, usage: BufferUsage, byte_length: usize) -> Self {
        Self {
            allocation: Arc::new(Allocation {
                bytes: Mutex::new(vec![0u8; byte_length]),
            }),
            byte_offset: 0,
            byte_length,
            memory_type,
            usage,
        }
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Whether two buffers alias the same allocation
    pub fn shares_allocation(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.allocation, &other.allocation)
    }

    pub fn subspan(&self, byte_offset: usize, byte_length: usize) -> HalResult<Buffer> {
        self.check_range(byte_offset, byte_length)?;
        Ok(Buffer {
            allocation: self.allocation.clone(),
            byte_offset: self.byte_offset + byte_offset,
            byte_length,
            memory_type: self.memory_type,
            usage: self.usage,
        })
    }

    pub fn read(&self, byte_offset: usize, out: &mut [u8]) -> HalResult<()> {
        self.check_range(byte_offset, out.len())?;
        let start = self.byte_offset + byte_offset;
        let bytes = self.allocation.bytes.lock();
        out.copy_from_slice(&bytes[start..start + out.len()]);
        Ok(())
    }

    pub fn read_vec(&self, byte_offset: usize, byte_length: usize) -> HalResult<Vec<u8>> {
        let mut out = vec![0u8; byte_length];
        self.read(byte_offset, &mut out)?;
        Ok(out)
    }

    pub fn write(&self, byte_offset: usize, data: &[u8]) -> HalResult<()> {
        self.check_range(byte_offset, data.len())?;
        let start = self.byte_offset + byte_offset;
        let mut bytes = self.allocation.bytes.lock();
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Repeat `pattern` (1, 2 or 4 bytes) over the range
    pub fn fill(&self, byte_offset: usize, byte_length: usize, pattern: &[u8]) -> HalResult<()> {
        if !matches!(pattern.len(), 1 | 2 | 4) {
            return Err(HalError::InvalidArgument(format!(
                "fill pattern length {} not 1, 2 or 4",
                pattern.len()
            )));
        }
        if byte_length % pattern.len() != 0 {
            return Err(HalError::InvalidArgument(format!(
                "fill length {} not a multiple of pattern length {}",
                byte_length,
                pattern.len()
            )));
        }
        self.check_range(byte_offset, byte_length)?;
        let start = self.byte_offset + byte_offset;
        let mut bytes = self.allocation.bytes.lock();
        for chunk in bytes[start..start + byte_length].chunks_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }
        Ok(())
    }

    /// Copy `byte_length` bytes from `source` into this buffer
    pub fn copy_from(
        &self,
        source: &Buffer,
        source_offset: usize,
        target_offset: usize,
        byte_length: usize,
    ) -> HalResult<()> {
        let staged = source.read_vec(source_offset, byte_length)?;
        self.write(target_offset, &staged)
    }

    /// Load a little-endian scalar of 1, 2 or 4 bytes
    pub fn load(&self, byte_offset: usize, length: usize) -> HalResult<u32> {
        if !matches!(length, 1 | 2 | 4) {
            return Err(HalError::InvalidArgument(format!(
                "load length {} not 1, 2 or 4",
                length
            )));
        }
        let mut raw = [0u8; 4];
        self.read(byte_offset, &mut raw[..length])?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Store the low `length` bytes of `value` little-endian
    pub fn store(&self, value: u32, byte_offset: usize, length: usize) -> HalResult<()> {
        if !matches!(length, 1 | 2 | 4) {
            return Err(HalError::InvalidArgument(format!(
                "store length {} not 1, 2 or 4",
                length
            )));
        }
        self.write(byte_offset, &value.to_le_bytes()[..length])
    }

    fn check_range(&self, byte_offset: usize, byte_length: usize) -> HalResult<()> {
        match byte_offset.checked_add(byte_length) {
            Some(end) if end <= self.byte_length => Ok(()),
            _ => Err(HalError::OutOfRange(format!(
                "range [{}, +{}) outside buffer of {} bytes",
                byte_offset, byte_length, self.byte_length
            ))),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("byte_offset", &self.byte_offset)
            .field("byte_length", &self.byte_length)
            .field("memory_type", &self.memory_type)
            .field("usage", &self.usage)
            .finish()
    }
}

impl Resource for Buffer {
    const KIND: ResourceKind = ResourceKind::Buffer;
}

/// Element type of a buffer view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ElementType {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Uint8 = 5,
    Uint16 = 6,
    Uint32 = 7,
    Uint64 = 8,
    Float16 = 9,
    Float32 = 10,
    Float64 = 11,
}

impl ElementType {
    pub fn from_code(code: u32) -> Option<Self> {
        use ElementType::*;
        [
            Int8, Int16, Int32, Int64, Uint8, Uint16, Uint32, Uint64, Float16, Float32, Float64,
        ]
        .into_iter()
        .find(|ty| *ty as u32 == code)
    }

    pub fn byte_size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 => 1,
            ElementType::Int16 | ElementType::Uint16 | ElementType::Float16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Uint64 | ElementType::Float64 => 8,
        }
    }
}

/// Layout of elements within a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EncodingType {
    Opaque = 0,
    DenseRowMajor = 1,
}

impl EncodingType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(EncodingType::Opaque),
            1 => Some(EncodingType::DenseRowMajor),
            _ => None,
        }
    }
}

/// A shaped, typed window onto a buffer.
#[derive(Debug)]
pub struct BufferView {
    buffer: Arc<Buffer>,
    shape: Vec<usize>,
    element_type: ElementType,
    encoding: EncodingType,
}

impl BufferView {
    pub fn create(
        buffer: Arc<Buffer>,
        shape: Vec<usize>,
        element_type: ElementType,
        encoding: EncodingType,
    ) -> HalResult<Self> {
        let view = Self {
            buffer,
            shape,
            element_type,
            encoding,
        };
        if encoding == EncodingType::DenseRowMajor && view.byte_length() > view.buffer.byte_length()
        {
            return Err(HalError::OutOfRange(format!(
                "view of {} bytes over buffer of {} bytes",
                view.byte_length(),
                view.buffer.byte_length()
            )));
        }
        Ok(view)
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(&self, index: usize) -> Option<usize> {
        self.shape.get(index).copied()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn encoding(&self) -> EncodingType {
        self.encoding
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Dense byte length implied by shape and element type
    pub fn byte_length(&self) -> usize {
        self.element_count() * self.element_type.byte_size()
    }
}

impl Resource for BufferView {
    const KIND: ResourceKind = ResourceKind::BufferView;
}
