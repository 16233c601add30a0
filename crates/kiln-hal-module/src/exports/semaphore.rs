//! Semaphore and fence exports, including the two waits that may suspend.

use crate::args::{
    arg_i32, arg_i64, arg_ref, arg_u64, await_or_block, deadline_after, new_ref, status_result,
};
use kiln_hal::{Device, Fence, Semaphore};
use kiln_types::sync::Arc;
use kiln_types::Value;
use kiln_vm::{NativeCall, NativeOutcome, VmError, WaitCondition};
use tracing::debug;

/// `semaphore.create(device, initial_value) -> semaphore`
pub fn create(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let semaphore = device.create_semaphore(arg_u64(args, 1)?)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(semaphore))?]))
}

/// `semaphore.query(semaphore) -> (status, value)`
///
/// A failed semaphore reports its status code and value 0 instead of
/// trapping.
pub fn query(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let semaphore = arg_ref::<Semaphore>(args, 0)?;
    let (status, value) = match semaphore.query() {
        Ok(value) => (0, value as i64),
        Err(err) => (err.status_code(), 0),
    };
    Ok(NativeOutcome::values([Value::I32(status), Value::I64(value)]))
}

pub fn signal(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let semaphore = arg_ref::<Semaphore>(args, 0)?;
    semaphore.signal(arg_u64(args, 1)?)?;
    Ok(NativeOutcome::none())
}

/// `semaphore.fail(semaphore, status)`
pub fn fail(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let semaphore = arg_ref::<Semaphore>(args, 0)?;
    let status = arg_i32(args, 1)?;
    debug!(status, "semaphore failed from bytecode");
    semaphore.fail(format!("status {}", status));
    Ok(NativeOutcome::none())
}

/// `semaphore.await(semaphore, value, timeout_ms) -> status`
pub fn await_value(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let semaphore = arg_ref::<Semaphore>(args, 0)?;
    let value = arg_u64(args, 1)?;
    let deadline = deadline_after(arg_i64(args, 2)?);
    await_or_block(
        call,
        WaitCondition::semaphore(semaphore, value, deadline),
        status_result,
    )
}

/// `fence.create(semaphore, value) -> fence`
pub fn fence_create(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let semaphore = arg_ref::<Semaphore>(args, 0)?;
    let fence = Fence::at(semaphore, arg_u64(args, 1)?);
    Ok(NativeOutcome::values([new_ref(call, Arc::new(fence))?]))
}

/// `fence.join(a, b) -> fence` holding the later timepoint per semaphore
pub fn fence_join(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let a = arg_ref::<Fence>(args, 0)?;
    let b = arg_ref::<Fence>(args, 1)?;
    Ok(NativeOutcome::values([new_ref(call, Arc::new(a.join(&b)))?]))
}

/// `fence.query(fence) -> status`: 0 when reached, 4 while pending
pub fn fence_query(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let fence = arg_ref::<Fence>(args, 0)?;
    let status = match fence.query() {
        Ok(true) => 0,
        Ok(false) => 4,
        Err(err) => err.status_code(),
    };
    Ok(NativeOutcome::values([Value::I32(status)]))
}

/// `fence.await(fence, timeout_ms) -> status`
pub fn fence_await(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let fence = arg_ref::<Fence>(args, 0)?;
    let deadline = deadline_after(arg_i64(args, 1)?);
    await_or_block(
        call,
        WaitCondition::fence((*fence).clone(), deadline),
        status_result,
    )
}
