//! Resource kinds and the trait tying native objects to them.
//!
//! The set of kinds is closed: every opaque object that crosses a module
//! boundary is one of these. Each kind has a fixed descriptor (its
//! type name and whether it belongs to the HAL or to the VM itself).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag carried by every registry entry and every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceKind {
    Buffer = 0,
    BufferView = 1,
    Device = 2,
    CommandBuffer = 3,
    DescriptorSet = 4,
    DescriptorSetLayout = 5,
    Executable = 6,
    ExecutableCache = 7,
    ExecutableLayout = 8,
    Event = 9,
    Fence = 10,
    Semaphore = 11,
    Allocator = 12,
    /// VM typed list (see [`crate::list::SharedList`])
    List = 32,
    /// Read-only byte buffer (module rodata)
    ByteBuffer = 33,
}

/// Which layer defines a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDomain {
    Hal,
    Vm,
}

/// Static per-kind capability table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDescriptor {
    /// Fully qualified type name, e.g. `hal.buffer`
    pub type_name: &'static str,
    pub domain: ResourceDomain,
}

impl ResourceKind {
    /// Every kind, in tag order.
    pub const ALL: [ResourceKind; 15] = [
        ResourceKind::Buffer,
        ResourceKind::BufferView,
        ResourceKind::Device,
        ResourceKind::CommandBuffer,
        ResourceKind::DescriptorSet,
        ResourceKind::DescriptorSetLayout,
        ResourceKind::Executable,
        ResourceKind::ExecutableCache,
        ResourceKind::ExecutableLayout,
        ResourceKind::Event,
        ResourceKind::Fence,
        ResourceKind::Semaphore,
        ResourceKind::Allocator,
        ResourceKind::List,
        ResourceKind::ByteBuffer,
    ];

    pub fn descriptor(self) -> KindDescriptor {
        use ResourceDomain::*;
        let (type_name, domain) = match self {
            ResourceKind::Buffer => ("hal.buffer", Hal),
            ResourceKind::BufferView => ("hal.buffer_view", Hal),
            ResourceKind::Device => ("hal.device", Hal),
            ResourceKind::CommandBuffer => ("hal.command_buffer", Hal),
            ResourceKind::DescriptorSet => ("hal.descriptor_set", Hal),
            ResourceKind::DescriptorSetLayout => ("hal.descriptor_set_layout", Hal),
            ResourceKind::Executable => ("hal.executable", Hal),
            ResourceKind::ExecutableCache => ("hal.executable_cache", Hal),
            ResourceKind::ExecutableLayout => ("hal.executable_layout", Hal),
            ResourceKind::Event => ("hal.event", Hal),
            ResourceKind::Fence => ("hal.fence", Hal),
            ResourceKind::Semaphore => ("hal.semaphore", Hal),
            ResourceKind::Allocator => ("hal.allocator", Hal),
            ResourceKind::List => ("vm.list", Vm),
            ResourceKind::ByteBuffer => ("vm.buffer", Vm),
        };
        KindDescriptor { type_name, domain }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_u8() == tag)
    }

    /// Look a kind up by its type name (`hal.buffer`, `vm.list`, ...)
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.descriptor().type_name == name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor().type_name)
    }
}

/// A native object that can be wrapped by the registry.
///
/// Implemented by concrete HAL objects and by trait objects such as
/// `dyn Device`; the registry stores `Arc<Self>` so unsized types work.
pub trait Resource: Send + Sync + 'static {
    const KIND: ResourceKind;
}
