//! Executables and the binding model used by dispatches.
//!
//! A dispatch sees the buffers of every descriptor set bound at the time it
//! was recorded, flattened in set order, plus the layout's push constants.

use crate::buffer::Buffer;
use crate::error::{HalError, HalResult};
use kiln_types::sync::{Arc, RwLock};
use kiln_types::{Resource, ResourceKind};
use std::collections::HashMap;
use std::fmt;

/// Executable format understood by host-side kernel tables
pub const HOST_EXECUTABLE_FORMAT: &str = "kiln-host";

/// What a kernel sees when it runs
pub struct DispatchContext<'a> {
    pub workgroup_count: [u32; 3],
    pub bindings: &'a [Arc<Buffer>],
    pub push_constants: &'a [u32],
}

/// Host implementation of one entry point
pub type KernelFn = Arc<dyn Fn(&DispatchContext<'_>) -> HalResult<()> + Send + Sync>;

/// Kernels a device can link executables against, by name
#[derive(Clone, Default)]
pub struct KernelTable {
    kernels: Arc<RwLock<HashMap<String, KernelFn>>>,
}

impl KernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&DispatchContext<'_>) -> HalResult<()> + Send + Sync + 'static,
    {
        self.kernels.write().insert(name.into(), Arc::new(kernel));
    }

    pub fn get(&self, name: &str) -> Option<KernelFn> {
        self.kernels.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.kernels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for KernelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kernels = self.kernels.read();
        let mut names: Vec<&String> = kernels.keys().collect();
        names.sort();
        f.debug_struct("KernelTable").field("kernels", &names).finish()
    }
}

#[derive(Debug)]
pub struct DescriptorSetLayout {
    binding_count: usize,
}

impl DescriptorSetLayout {
    pub fn new(binding_count: usize) -> Self {
        Self { binding_count }
    }

    pub fn binding_count(&self) -> usize {
        self.binding_count
    }
}

impl Resource for DescriptorSetLayout {
    const KIND: ResourceKind = ResourceKind::DescriptorSetLayout;
}

/// Buffers bound to the slots of a layout
#[derive(Debug)]
pub struct DescriptorSet {
    layout: Arc<DescriptorSetLayout>,
    bindings: Vec<Arc<Buffer>>,
}

impl DescriptorSet {
    pub fn create(layout: Arc<DescriptorSetLayout>, bindings: Vec<Arc<Buffer>>) -> HalResult<Self> {
        if bindings.len() != layout.binding_count() {
            return Err(HalError::InvalidArgument(format!(
                "descriptor set has {} bindings, layout declares {}",
                bindings.len(),
                layout.binding_count()
            )));
        }
        Ok(Self { layout, bindings })
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn bindings(&self) -> &[Arc<Buffer>] {
        &self.bindings
    }
}

impl Resource for DescriptorSet {
    const KIND: ResourceKind = ResourceKind::DescriptorSet;
}

#[derive(Debug)]
pub struct ExecutableLayout {
    push_constants: usize,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl ExecutableLayout {
    pub fn new(push_constants: usize, set_layouts: Vec<Arc<DescriptorSetLayout>>) -> Self {
        Self {
            push_constants,
            set_layouts,
        }
    }

    pub fn push_constants(&self) -> usize {
        self.push_constants
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }
}

impl Resource for ExecutableLayout {
    const KIND: ResourceKind = ResourceKind::ExecutableLayout;
}

/// Prepared program: entry points addressed by ordinal
pub struct Executable {
    layout: Arc<ExecutableLayout>,
    entry_points: Vec<(String, KernelFn)>,
}

impl Executable {
    pub fn layout(&self) -> &Arc<ExecutableLayout> {
        &self.layout
    }

    pub fn entry_point_count(&self) -> usize {
        self.entry_points.len()
    }

    pub fn entry_point(&self, ordinal: u32) -> HalResult<&KernelFn> {
        self.entry_points
            .get(ordinal as usize)
            .map(|(_, kernel)| kernel)
            .ok_or_else(|| {
                HalError::OutOfRange(format!(
                    "entry point {} of {}",
                    ordinal,
                    self.entry_points.len()
                ))
            })
    }

    pub fn entry_point_name(&self, ordinal: u32) -> Option<&str> {
        self.entry_points
            .get(ordinal as usize)
            .map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.entry_points.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Executable")
            .field("layout", &self.layout)
            .field("entry_points", &names)
            .finish()
    }
}

impl Resource for Executable {
    const KIND: ResourceKind = ResourceKind::Executable;
}

/// Turns executable payloads into [`Executable`]s for one device.
#[derive(Debug, Clone)]
pub struct ExecutableCache {
    kernels: KernelTable,
}

impl ExecutableCache {
    pub fn new(kernels: KernelTable) -> Self {
        Self { kernels }
    }

    pub fn can_prepare(&self, format: &str) -> bool {
        format == HOST_EXECUTABLE_FORMAT
    }

    /// Link `data` (newline separated entry point names) against the
    /// device kernel table.
    pub fn prepare(
        &self,
        layout: Arc<ExecutableLayout>,
        format: &str,
        data: &[u8],
    ) -> HalResult<Executable> {
        if !self.can_prepare(format) {
            return Err(HalError::Unimplemented(format!(
                "executable format '{}'",
                format
            )));
        }
        let text = std::str::from_utf8(data)
            .map_err(|e| HalError::InvalidArgument(format!("executable data: {}", e)))?;

        let entry_points = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|name| {
                self.kernels
                    .get(name)
                    .map(|kernel| (name.to_string(), kernel))
                    .ok_or_else(|| HalError::InvalidArgument(format!("unknown kernel '{}'", name)))
            })
            .collect::<HalResult<Vec<_>>>()?;

        Ok(Executable {
            layout,
            entry_points,
        })
    }
}

impl Resource for ExecutableCache {
    const KIND: ResourceKind = ResourceKind::ExecutableCache;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(names: &[&str]) -> ExecutableCache {
        let table = KernelTable::new();
        for name in names {
            table.register(*name, |_| Ok(()));
        }
        ExecutableCache::new(table)
    }

    #[test]
    fn test_prepare_resolves_entry_points_in_order() {
        let cache = cache_with(&["add", "mul"]);
        let layout = Arc::new(ExecutableLayout::new(0, vec![]));
        let exe = cache
            .prepare(layout, HOST_EXECUTABLE_FORMAT, b"mul\nadd\n")
            .unwrap();
        assert_eq!(exe.entry_point_count(), 2);
        assert_eq!(exe.entry_point_name(0), Some("mul"));
        assert!(exe.entry_point(2).is_err());
    }

    #[test]
    fn test_prepare_rejects_unknown_kernel_and_format() {
        let cache = cache_with(&["add"]);
        let layout = Arc::new(ExecutableLayout::new(0, vec![]));
        assert!(matches!(
            cache.prepare(layout.clone(), HOST_EXECUTABLE_FORMAT, b"sub"),
            Err(HalError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.prepare(layout, "spirv", b"add"),
            Err(HalError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_descriptor_set_matches_layout() {
        let layout = Arc::new(DescriptorSetLayout::new(2));
        let buffer = Arc::new(Buffer::allocate(
            crate::buffer::MemoryType::HOST_LOCAL,
            crate::buffer::BufferUsage::DISPATCH,
            16,
        ));
        assert!(DescriptorSet::create(layout.clone(), vec![buffer.clone()]).is_err());
        let set = DescriptorSet::create(layout, vec![buffer.clone(), buffer]).unwrap();
        assert_eq!(set.bindings().len(), 2);
    }
}
