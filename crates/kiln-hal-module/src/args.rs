//! Argument decoding and wait handling shared by the exports.

use crate::state::HalModuleState;
use kiln_hal::HalError;
use kiln_types::sync::Arc;
use kiln_types::{Resource, SharedList, Value};
use kiln_vm::{NativeCall, NativeOutcome, TrapKind, VmError, WaitCondition, WaitResolution};
use std::time::{Duration, Instant};

pub(crate) fn arg(args: &[Value], index: usize) -> Result<&Value, VmError> {
    args.get(index)
        .ok_or_else(|| VmError::InvalidState(format!("missing argument {}", index)))
}

fn mismatch(expected: impl Into<String>, value: &Value) -> VmError {
    VmError::TypeMismatch {
        expected: expected.into(),
        actual: value.value_type().to_string(),
    }
}

/// Resolve a non-null ref argument of resource type `T`
pub(crate) fn arg_ref<T>(args: &[Value], index: usize) -> Result<Arc<T>, VmError>
where
    T: Resource + ?Sized,
{
    arg_opt_ref(args, index)?.ok_or_else(|| TrapKind::NullReference.into())
}

/// Resolve a ref argument that may be null
pub(crate) fn arg_opt_ref<T>(args: &[Value], index: usize) -> Result<Option<Arc<T>>, VmError>
where
    T: Resource + ?Sized,
{
    match arg(args, index)? {
        Value::Ref(Some(r)) => Ok(Some(r.resolve::<T>()?)),
        Value::Ref(None) => Ok(None),
        other => Err(mismatch(format!("ref<{}>", T::KIND), other)),
    }
}

pub(crate) fn arg_i32(args: &[Value], index: usize) -> Result<i32, VmError> {
    match arg(args, index)? {
        Value::I32(v) => Ok(*v),
        other => Err(mismatch("i32", other)),
    }
}

pub(crate) fn arg_i64(args: &[Value], index: usize) -> Result<i64, VmError> {
    match arg(args, index)? {
        Value::I64(v) => Ok(*v),
        other => Err(mismatch("i64", other)),
    }
}

/// A non-negative i64 byte offset, length or payload
pub(crate) fn arg_u64(args: &[Value], index: usize) -> Result<u64, VmError> {
    let value = arg_i64(args, index)?;
    u64::try_from(value).map_err(|_| {
        HalError::InvalidArgument(format!("argument {} must be non-negative, got {}", index, value))
            .into()
    })
}

pub(crate) fn arg_usize(args: &[Value], index: usize) -> Result<usize, VmError> {
    let value = arg_u64(args, index)?;
    usize::try_from(value)
        .map_err(|_| HalError::OutOfRange(format!("argument {} too large: {}", index, value)).into())
}

/// A non-negative i32 count or ordinal
pub(crate) fn arg_u32(args: &[Value], index: usize) -> Result<u32, VmError> {
    let value = arg_i32(args, index)?;
    u32::try_from(value).map_err(|_| {
        HalError::InvalidArgument(format!("argument {} must be non-negative, got {}", index, value))
            .into()
    })
}

/// Every element of a list argument, resolved as `T`
pub(crate) fn arg_ref_list<T>(args: &[Value], index: usize) -> Result<Vec<Arc<T>>, VmError>
where
    T: Resource + ?Sized,
{
    let list = arg_ref::<SharedList>(args, index)?;
    let list = list.lock();
    (0..list.size())
        .map(|i| -> Result<Arc<T>, VmError> {
            list.get_ref_retain_as::<T>(i)?
                .ok_or_else(|| VmError::from(TrapKind::NullReference))?
                .resolve::<T>()
                .map_err(VmError::from)
        })
        .collect()
}

/// Wrap a new object in a registry entry
pub(crate) fn new_ref<T>(call: &NativeCall<'_>, object: Arc<T>) -> Result<Value, VmError>
where
    T: Resource + ?Sized,
{
    Ok(Value::Ref(Some(call.registry().register_ref(object)?)))
}

pub(crate) fn hal_state<'a>(call: &NativeCall<'a>) -> Result<&'a HalModuleState, VmError> {
    call.state::<HalModuleState>()
}

/// Deadline for a millisecond timeout; negative waits forever
pub(crate) fn deadline_after(timeout_ms: i64) -> Option<Instant> {
    u64::try_from(timeout_ms)
        .ok()
        .map(|ms| Instant::now() + Duration::from_millis(ms))
}

/// Maps a finished wait to the export's results
pub(crate) type Finish = fn(WaitResolution) -> Result<Vec<Value>, VmError>;

/// Status of the wait as a single i32 result; a failed timeline is raised
/// as the device's error instead
pub(crate) fn status_result(resolution: WaitResolution) -> Result<Vec<Value>, VmError> {
    match resolution {
        WaitResolution::Failed(err) => Err(VmError::DeviceError(err)),
        resolved => Ok(vec![Value::I32(resolved.status_code())]),
    }
}

/// Complete now if `condition` already holds, block under `SYNCHRONOUS`,
/// suspend the fiber otherwise.
pub(crate) fn await_or_block(
    call: &NativeCall<'_>,
    condition: WaitCondition,
    finish: Finish,
) -> Result<NativeOutcome, VmError> {
    if let Some(resolution) = condition.try_resolve() {
        return finish(resolution).map(NativeOutcome::Return);
    }
    if hal_state(call)?.is_synchronous() {
        return finish(condition.wait_blocking()).map(NativeOutcome::Return);
    }
    Ok(NativeOutcome::await_then(condition, move |_, resolution| {
        finish(resolution)
    }))
}
