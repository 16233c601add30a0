//! Device exports: the shared device, queries and queue submission.

use crate::args::{arg_i32, arg_opt_ref, arg_ref, await_or_block, hal_state, Finish};
use kiln_hal::{CommandBuffer, Device, DeviceQuery, Fence, HalError, SubmissionBatch};
use kiln_types::sync::Arc;
use kiln_types::Value;
use kiln_vm::{NativeCall, NativeOutcome, VmError, WaitCondition, WaitResolution};
use tracing::trace;

/// `ex.shared_device() -> device`
pub fn shared_device(call: &NativeCall<'_>, _args: &[Value]) -> Result<NativeOutcome, VmError> {
    let state = hal_state(call)?;
    Ok(NativeOutcome::values([Value::Ref(Some(state.device_ref.clone()))]))
}

/// `device.query.i64(device, key) -> (ok, value)`; unknown keys give `(0, 0)`
pub fn query_i64(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let answer = match DeviceQuery::from_key(arg_i32(args, 1)?) {
        Some(key) => device.query_i64(key)?,
        None => None,
    };
    let (ok, value) = match answer {
        Some(value) => (1, value),
        None => (0, 0),
    };
    Ok(NativeOutcome::values([Value::I32(ok), Value::I64(value)]))
}

/// `device.queue.execute(device, wait_fence?, signal_fence?, command_buffer)`
pub fn queue_execute(_call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let wait = arg_opt_ref::<Fence>(args, 1)?;
    let signal = arg_opt_ref::<Fence>(args, 2)?;
    let command_buffer = arg_ref::<CommandBuffer>(args, 3)?;

    let batch = SubmissionBatch {
        wait: wait.map(|f| (*f).clone()).unwrap_or_default(),
        command_buffers: vec![command_buffer],
        signal: signal.map(|f| (*f).clone()).unwrap_or_default(),
    };
    trace!(device = %device.id(), "queue execute");
    device.queue_submit(batch)?;
    Ok(NativeOutcome::none())
}

fn submit_finished(resolution: WaitResolution) -> Result<Vec<Value>, VmError> {
    match resolution {
        WaitResolution::Signaled => Ok(Vec::new()),
        WaitResolution::TimedOut => Err(HalError::DeadlineExceeded.into()),
        WaitResolution::Failed(err) => Err(VmError::DeviceError(err)),
    }
}

/// `ex.submit_and_wait(device, command_buffer)`: submit and wait for the
/// batch to retire; a failed batch fails the call.
pub fn submit_and_wait(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let device = arg_ref::<dyn Device>(args, 0)?;
    let command_buffer = arg_ref::<CommandBuffer>(args, 1)?;

    let semaphore = Arc::new(device.create_semaphore(0)?);
    device.queue_submit(SubmissionBatch {
        wait: Fence::new(),
        command_buffers: vec![command_buffer],
        signal: Fence::at(semaphore.clone(), 1),
    })?;
    let finish: Finish = submit_finished;
    await_or_block(call, WaitCondition::semaphore(semaphore, 1, None), finish)
}
