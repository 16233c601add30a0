//! Command buffer recording and events.

use crate::args::{arg_i32, arg_ref, arg_u32, arg_usize, new_ref};
use kiln_hal::{
    Buffer, CommandBuffer, CommandBufferMode, CommandCategory, DescriptorSet, Device, Event,
    Executable, ExecutableLayout, HalError,
};
use kiln_types::sync::Arc;
use kiln_types::{ByteBuffer, SharedList, Value};
use kiln_vm::{NativeCall, NativeOutcome, VmError};

/// `command_buffer.create(device, modes, categories) -> command_buffer`
pub fn create(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let modes = arg_u32(args, 1)?;
    let mode = CommandBufferMode::from_bits(modes)
        .ok_or_else(|| HalError::InvalidArgument(format!("command buffer mode bits {:#x}", modes)))?;
    let categories = arg_u32(args, 2)?;
    let categories = CommandCategory::from_bits(categories).ok_or_else(|| {
        HalError::InvalidArgument(format!("command category bits {:#x}", categories))
    })?;

    let command_buffer = device.create_command_buffer(mode, categories)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(command_buffer))?]))
}

pub fn begin(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    arg_ref::<CommandBuffer>(args, 0)?.begin()?;
    Ok(NativeOutcome::none())
}

pub fn end(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    arg_ref::<CommandBuffer>(args, 0)?.end()?;
    Ok(NativeOutcome::none())
}

/// `command_buffer.fill_buffer(cb, target, offset, length, pattern, pattern_length)`
///
/// The pattern is the low `pattern_length` bytes of `pattern`, little-endian.
pub fn fill_buffer(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    let target = arg_ref::<Buffer>(args, 1)?;
    let offset = arg_usize(args, 2)?;
    let length = arg_usize(args, 3)?;
    let pattern = arg_i32(args, 4)?;
    let pattern_length = arg_u32(args, 5)? as usize;
    if pattern_length > 4 {
        return Err(HalError::InvalidArgument(format!("fill pattern length {}", pattern_length)).into());
    }

    let bytes = (pattern as u32).to_le_bytes()[..pattern_length].to_vec();
    command_buffer.fill_buffer(target, offset, length, bytes)?;
    Ok(NativeOutcome::none())
}

/// `command_buffer.copy_buffer(cb, source, source_offset, target, target_offset, length)`
pub fn copy_buffer(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    command_buffer.copy_buffer(
        arg_ref::<Buffer>(args, 1)?,
        arg_usize(args, 2)?,
        arg_ref::<Buffer>(args, 3)?,
        arg_usize(args, 4)?,
        arg_usize(args, 5)?,
    )?;
    Ok(NativeOutcome::none())
}

/// `command_buffer.update_buffer(cb, source, source_offset, target, target_offset, length)`
///
/// Snapshots `length` bytes of the host byte buffer at record time.
pub fn update_buffer(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    let source = arg_ref::<ByteBuffer>(args, 1)?;
    let source_offset = arg_usize(args, 2)?;
    let target = arg_ref::<Buffer>(args, 3)?;
    let target_offset = arg_usize(args, 4)?;
    let length = arg_usize(args, 5)?;

    let data = source_offset
        .checked_add(length)
        .and_then(|end| source.as_bytes().get(source_offset..end))
        .ok_or_else(|| {
            HalError::OutOfRange(format!(
                "source range [{}, +{}) exceeds {} bytes",
                source_offset,
                length,
                source.len()
            ))
        })?;
    command_buffer.update_buffer(data.to_vec(), target, target_offset)?;
    Ok(NativeOutcome::none())
}

pub fn execution_barrier(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    arg_ref::<CommandBuffer>(args, 0)?.execution_barrier()?;
    Ok(NativeOutcome::none())
}

pub fn signal_event(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    command_buffer.signal_event(arg_ref::<Event>(args, 1)?)?;
    Ok(NativeOutcome::none())
}

pub fn reset_event(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    command_buffer.reset_event(arg_ref::<Event>(args, 1)?)?;
    Ok(NativeOutcome::none())
}

/// `command_buffer.bind_descriptor_set(cb, executable_layout, set, descriptor_set)`
pub fn bind_descriptor_set(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    command_buffer.bind_descriptor_set(
        arg_ref::<ExecutableLayout>(args, 1)?,
        arg_u32(args, 2)?,
        arg_ref::<DescriptorSet>(args, 3)?,
    )?;
    Ok(NativeOutcome::none())
}

/// `command_buffer.push_constants(cb, executable_layout, offset, values)`
pub fn push_constants(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    let layout = arg_ref::<ExecutableLayout>(args, 1)?;
    let offset = arg_usize(args, 2)?;
    let values = arg_ref::<SharedList>(args, 3)?;
    let values = {
        let values = values.lock();
        (0..values.size())
            .map(|i| -> Result<u32, VmError> {
                match values.get_value(i)? {
                    Value::I32(v) => Ok(v as u32),
                    other => Err(VmError::TypeMismatch {
                        expected: "i32 push constant".into(),
                        actual: other.value_type().to_string(),
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    command_buffer.push_constants(layout, offset, values)?;
    Ok(NativeOutcome::none())
}

/// `command_buffer.dispatch(cb, executable, entry_point, x, y, z)`
pub fn dispatch(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let command_buffer = arg_ref::<CommandBuffer>(args, 0)?;
    let executable = arg_ref::<Executable>(args, 1)?;
    let entry_point = arg_u32(args, 2)?;
    let workgroups = [arg_u32(args, 3)?, arg_u32(args, 4)?, arg_u32(args, 5)?];
    command_buffer.dispatch(executable, entry_point, workgroups)?;
    Ok(NativeOutcome::none())
}

/// `event.create(device) -> event`
pub fn event_create(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let event = device.create_event()?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(event))?]))
}
