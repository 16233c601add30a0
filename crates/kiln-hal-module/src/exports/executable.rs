//! Descriptor sets, layouts and executable preparation.

use crate::args::{arg_ref, arg_ref_list, arg_u32, new_ref};
use kiln_hal::{
    Buffer, DescriptorSet, DescriptorSetLayout, Device, ExecutableCache, ExecutableLayout,
    HalError,
};
use kiln_types::sync::Arc;
use kiln_types::{ByteBuffer, Value};
use kiln_vm::{NativeCall, NativeOutcome, VmError};
use tracing::debug;

/// `descriptor_set_layout.create(device, binding_count) -> layout`
pub fn descriptor_set_layout_create(
    call: &NativeCall<'_>,
    args: &[Value],
) -> Result<NativeOutcome, VmError> {
    let _device = arg_ref::<dyn Device>(args, 0)?;
    let layout = DescriptorSetLayout::new(arg_u32(args, 1)? as usize);
    Ok(NativeOutcome::values([new_ref(call, Arc::new(layout))?]))
}

/// `descriptor_set.create(device, layout, buffers) -> set`
pub fn descriptor_set_create(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let _device = arg_ref::<dyn Device>(args, 0)?;
    let layout = arg_ref::<DescriptorSetLayout>(args, 1)?;
    let bindings = arg_ref_list::<Buffer>(args, 2)?;
    let set = DescriptorSet::create(layout, bindings)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(set))?]))
}

/// `executable_layout.create(device, push_constants, set_layouts) -> layout`
pub fn executable_layout_create(
    call: &NativeCall<'_>,
    args: &[Value],
) -> Result<NativeOutcome, VmError> {
    let _device = arg_ref::<dyn Device>(args, 0)?;
    let push_constants = arg_u32(args, 1)? as usize;
    let set_layouts = arg_ref_list::<DescriptorSetLayout>(args, 2)?;
    let layout = ExecutableLayout::new(push_constants, set_layouts);
    Ok(NativeOutcome::values([new_ref(call, Arc::new(layout))?]))
}

/// `executable_cache.create(device) -> cache`
pub fn executable_cache_create(
    call: &NativeCall<'_>,
    args: &[Value],
) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let cache = device.create_executable_cache()?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(cache))?]))
}

/// `executable_cache.prepare(cache, layout, format, data) -> executable`
///
/// `format` and `data` are byte buffers, usually module rodata.
pub fn executable_cache_prepare(
    call: &NativeCall<'_>,
    args: &[Value],
) -> Result<NativeOutcome, VmError> {
    let cache = arg_ref::<ExecutableCache>(args, 0)?;
    let layout = arg_ref::<ExecutableLayout>(args, 1)?;
    let format = arg_ref::<ByteBuffer>(args, 2)?;
    let format = format
        .as_str()
        .ok_or_else(|| HalError::InvalidArgument("executable format is not UTF-8".into()))?;
    let data = arg_ref::<ByteBuffer>(args, 3)?;

    let executable = cache.prepare(layout, format, data.as_bytes())?;
    debug!(
        format,
        entry_points = executable.entry_point_count(),
        "executable prepared"
    );
    Ok(NativeOutcome::values([new_ref(call, Arc::new(executable))?]))
}
