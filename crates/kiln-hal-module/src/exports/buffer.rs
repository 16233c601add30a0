//! Buffer allocation, access and buffer views.

use crate::args::{arg, arg_i32, arg_ref, arg_u32, arg_usize, new_ref};
use kiln_hal::{
    Allocator, Buffer, BufferUsage, BufferView, Device, ElementType, EncodingType, HalError,
    MemoryType,
};
use kiln_types::sync::Arc;
use kiln_types::{ResourceKind, SharedList, Value};
use kiln_vm::{NativeCall, NativeOutcome, TrapKind, VmError};

fn length_value(length: usize) -> Value {
    Value::I64(length as i64)
}

/// Allocator in argument `index`; a device stands in for its own allocator
fn allocator_arg(args: &[Value], index: usize) -> Result<Arc<Allocator>, VmError> {
    match arg(args, index)? {
        Value::Ref(Some(r)) if r.kind() == ResourceKind::Device => {
            Ok(Arc::new(Allocator::new(r.resolve::<dyn Device>()?)))
        }
        _ => arg_ref::<Allocator>(args, index),
    }
}

/// `device.allocator(device) -> allocator`
pub fn device_allocator(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(Allocator::new(device)))?]))
}

/// `allocator.allocate(allocator, memory_types, usage, size) -> buffer`
///
/// A device ref is accepted in place of the allocator.
pub fn allocate(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let allocator = allocator_arg(args, 0)?;
    let memory_type = MemoryType::from_bits(arg_u32(args, 1)?)
        .ok_or_else(|| HalError::InvalidArgument("unknown memory type bits".into()))?;
    let usage = BufferUsage::from_bits(arg_u32(args, 2)?)
        .ok_or_else(|| HalError::InvalidArgument("unknown buffer usage bits".into()))?;
    let size = arg_usize(args, 3)?;

    let buffer = allocator.allocate(memory_type, usage, size)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(buffer))?]))
}

/// `buffer.length(buffer) -> i64`
pub fn length(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let buffer = arg_ref::<Buffer>(args, 0)?;
    Ok(NativeOutcome::values([length_value(buffer.byte_length())]))
}

/// `buffer.subspan(buffer, offset, length) -> buffer` sharing the allocation
pub fn subspan(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let buffer = arg_ref::<Buffer>(args, 0)?;
    let span = buffer.subspan(arg_usize(args, 1)?, arg_usize(args, 2)?)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(span))?]))
}

/// `buffer.load(buffer, offset, length) -> i32`
pub fn load(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let buffer = arg_ref::<Buffer>(args, 0)?;
    let value = buffer.load(arg_usize(args, 1)?, arg_u32(args, 2)? as usize)?;
    Ok(NativeOutcome::values([Value::I32(value as i32)]))
}

/// `buffer.store(value, buffer, offset, length)`
pub fn store(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let value = arg_i32(args, 0)? as u32;
    let buffer = arg_ref::<Buffer>(args, 1)?;
    buffer.store(value, arg_usize(args, 2)?, arg_u32(args, 3)? as usize)?;
    Ok(NativeOutcome::none())
}

/// Dimensions from a list of i32 or i64 values
fn shape_from_list(list: &SharedList) -> Result<Vec<usize>, VmError> {
    let list = list.lock();
    (0..list.size())
        .map(|i| -> Result<usize, VmError> {
            let dim = match list.get_value(i)? {
                Value::I32(v) => v as i64,
                Value::I64(v) => v,
                other => {
                    return Err(VmError::TypeMismatch {
                        expected: "integer dimension".into(),
                        actual: other.value_type().to_string(),
                    })
                }
            };
            usize::try_from(dim).map_err(|_| {
                HalError::InvalidArgument(format!("negative dimension {} at {}", dim, i)).into()
            })
        })
        .collect()
}

/// `buffer_view.create(buffer, element_type, encoding, shape) -> view`
pub fn view_create(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let buffer = arg_ref::<Buffer>(args, 0)?;
    let element_type = arg_u32(args, 1)?;
    let element_type = ElementType::from_code(element_type).ok_or_else(|| {
        HalError::InvalidArgument(format!("unknown element type {}", element_type))
    })?;
    let encoding = arg_u32(args, 2)?;
    let encoding = EncodingType::from_code(encoding)
        .ok_or_else(|| HalError::InvalidArgument(format!("unknown encoding {}", encoding)))?;
    let shape = arg_ref::<SharedList>(args, 3)?;
    let shape = shape_from_list(&shape)?;

    let view = BufferView::create(buffer, shape, element_type, encoding)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(view))?]))
}

/// `buffer_view.buffer(view) -> buffer`
///
/// The view keeps its buffer alive, not a registry entry, so the result is
/// a new entry aliasing the same allocation.
pub fn view_buffer(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let view = arg_ref::<BufferView>(args, 0)?;
    Ok(NativeOutcome::values([new_ref(call, view.buffer().clone())?]))
}

pub fn view_element_type(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let view = arg_ref::<BufferView>(args, 0)?;
    Ok(NativeOutcome::values([Value::I32(view.element_type() as i32)]))
}

pub fn view_rank(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let view = arg_ref::<BufferView>(args, 0)?;
    Ok(NativeOutcome::values([Value::I32(view.rank() as i32)]))
}

/// `buffer_view.dim(view, index) -> i64`
pub fn view_dim(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let view = arg_ref::<BufferView>(args, 0)?;
    let index = arg_i32(args, 1)?;
    let dim = usize::try_from(index)
        .ok()
        .and_then(|i| view.dim(i))
        .ok_or(TrapKind::IndexOutOfBounds {
            index: index as i64,
            size: view.rank(),
        })?;
    Ok(NativeOutcome::values([length_value(dim)]))
}

pub fn view_byte_length(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let view = arg_ref::<BufferView>(args, 0)?;
    Ok(NativeOutcome::values([length_value(view.byte_length())]))
}
