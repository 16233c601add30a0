use super::helpers::context;
use crate::builder::{FunctionBuilder, ModuleBuilder};
use crate::context::Context;
use crate::error::VmError;
use crate::module::Module;
use crate::native::{NativeCall, NativeModule, NativeOutcome};
use crate::opcode::OpCode;
use crate::suspension::{
    run_all_async, run_async, HostScheduler, Outcome, SuspensionController, WaitCondition,
    WaitResolution,
};
use crate::vm::{Fiber, FiberId, FiberState, FiberStatus};
use kiln_hal::{HalError, Semaphore};
use kiln_types::sync::{Arc, Mutex};
use kiln_types::Value;
use std::time::{Duration, Instant};

struct WaitState {
    semaphore: Arc<Semaphore>,
}

fn wait_state<'a>(call: &NativeCall<'a>) -> Result<&'a WaitState, VmError> {
    call.state::<WaitState>()
}

/// Status of a finished wait; device failures propagate as errors
fn status_or_error(resolution: WaitResolution) -> Result<Vec<Value>, VmError> {
    match resolution {
        WaitResolution::Failed(err) => Err(err.into()),
        resolved => Ok(vec![Value::I32(resolved.status_code())]),
    }
}

/// Suspend until the shared semaphore reaches the argument; yield the status
fn wait(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let value = args[0].as_i64().unwrap_or_default() as u64;
    let condition = WaitCondition::semaphore(wait_state(call)?.semaphore.clone(), value, None);
    Ok(NativeOutcome::await_then(condition, |_, resolution| {
        status_or_error(resolution)
    }))
}

/// Same wait, with a deadline that has already passed
fn wait_expired(call: &NativeCall<'_>, args: &[Value]) -> Result<NativeOutcome, VmError> {
    let value = args[0].as_i64().unwrap_or_default() as u64;
    let condition =
        WaitCondition::semaphore(wait_state(call)?.semaphore.clone(), value, Some(Instant::now()));
    Ok(NativeOutcome::await_then(condition, |_, resolution| {
        status_or_error(resolution)
    }))
}

fn sync_module() -> Module {
    NativeModule::builder("sync")
        .function("wait", "0I_i", wait)
        .and_then(|b| b.function("wait_expired", "0I_i", wait_expired))
        .unwrap()
        .state(|_| {
            Ok(Box::new(WaitState {
                semaphore: Arc::new(Semaphore::new(0)),
            }))
        })
        .build()
        .into()
}

/// `app.main(v)`: allocate a list, wait on `v`, return status + 100.
/// `app.expired(v)`: the same against an expired deadline.
fn app_module() -> Module {
    let mut m = ModuleBuilder::new("app");
    let wait = m.import("sync", "wait", "0I_i").unwrap();
    let expired = m.import("sync", "wait_expired", "0I_i").unwrap();

    for (name, import) in [("main", wait), ("expired", expired)] {
        let mut f = FunctionBuilder::new(name, "0I_i").unwrap();
        f.registers(3)
            .load_i32(1, 0)
            .abc(OpCode::ListAlloc, 1, 1, 0)
            .call_import(0, import)
            .load_i32(2, 100)
            .abc(OpCode::Add, 0, 0, 2)
            .ret(0);
        let ordinal = m.function(f).unwrap();
        m.export(name, ordinal);
    }
    m.build().unwrap().into()
}

fn setup() -> (Arc<Context>, Arc<Semaphore>) {
    let ctx = context(vec![app_module(), sync_module()]);
    let semaphore = ctx
        .state("sync")
        .unwrap()
        .native::<WaitState>()
        .unwrap()
        .semaphore
        .clone();
    (ctx, semaphore)
}

fn fiber(ctx: &Arc<Context>, value: i64) -> Fiber {
    Fiber::new(ctx, "app.main", vec![Value::I64(value)]).unwrap()
}

fn returned(outcome: Result<Outcome, VmError>) -> Vec<Value> {
    match outcome.unwrap() {
        Outcome::Returned(list) => list.into_values().unwrap(),
        Outcome::Suspended(token) => panic!("still suspended as {}", token),
    }
}

#[test]
fn test_notify_then_poll_resumes_after_call() {
    let (ctx, semaphore) = setup();
    let mut controller = SuspensionController::new();

    let token = match controller.run(fiber(&ctx, 1)).unwrap() {
        Outcome::Suspended(token) => token,
        Outcome::Returned(_) => panic!("fiber should suspend"),
    };
    assert!(controller.is_parked(token));
    assert!(controller.poll().is_empty());

    semaphore.signal(1).unwrap();
    let notified = WaitCondition::semaphore(semaphore.clone(), 1, None);
    assert_eq!(controller.notify(&notified), 1);

    let mut resumed = controller.poll();
    assert_eq!(resumed.len(), 1);
    let resumed = resumed.remove(0);
    assert_eq!(resumed.token, token);
    // Status 0 from the wait, then the add after the call
    assert_eq!(returned(resumed.outcome), vec![Value::I32(100)]);
    assert_eq!(controller.pending(), 0);
    assert!(!controller.is_parked(token));
    assert_eq!(ctx.registry().live_count(), 0);
}

#[test]
fn test_poll_detects_progress_without_notify() {
    let (ctx, semaphore) = setup();
    let mut controller = SuspensionController::new();
    controller.run(fiber(&ctx, 2)).unwrap();

    semaphore.signal(1).unwrap();
    assert!(controller.poll().is_empty());

    semaphore.signal(2).unwrap();
    let resumed = controller.poll();
    assert_eq!(resumed.len(), 1);
    assert_eq!(returned(resumed.into_iter().next().unwrap().outcome), vec![Value::I32(100)]);
}

#[test]
fn test_expired_deadline_resumes_with_timeout_status() {
    let (ctx, _) = setup();
    let mut controller = SuspensionController::new();
    let fiber = Fiber::new(&ctx, "app.expired", vec![Value::I64(1)]).unwrap();
    controller.run(fiber).unwrap();

    let resumed = controller.poll();
    assert_eq!(resumed.len(), 1);
    assert_eq!(returned(resumed.into_iter().next().unwrap().outcome), vec![Value::I32(104)]);
}

#[test]
fn test_failed_semaphore_resumes_with_device_error() {
    let (ctx, semaphore) = setup();
    let mut controller = SuspensionController::new();
    controller.run(fiber(&ctx, 1)).unwrap();

    semaphore.fail("device lost");
    let resumed = controller.poll();
    assert_eq!(resumed.len(), 1);
    assert_eq!(
        resumed.into_iter().next().unwrap().outcome.unwrap_err(),
        VmError::DeviceError(HalError::Aborted("device lost".into()))
    );
    // The failed fiber's frames are gone
    assert_eq!(ctx.registry().live_count(), 0);
}

#[test]
fn test_blocking_wait_on_failed_semaphore_errors() {
    let (ctx, semaphore) = setup();
    semaphore.fail("device lost");
    assert_eq!(
        ctx.invoke("app.main", vec![Value::I64(1)]).unwrap_err(),
        VmError::DeviceError(HalError::Aborted("device lost".into()))
    );
}

#[test]
fn test_cancel_releases_without_resuming() {
    let (ctx, _) = setup();
    let mut controller = SuspensionController::new();
    let fiber = fiber(&ctx, 1);
    let id = fiber.id();
    let Outcome::Suspended(token) = controller.run(fiber).unwrap() else {
        panic!("fiber should suspend");
    };
    // The list allocated before the call is held by the parked frame
    assert_eq!(ctx.registry().live_count(), 1);

    let cancelled = controller.cancel(token).unwrap();
    assert_eq!(cancelled.token, token);
    assert_eq!(cancelled.fiber, id);
    assert_eq!(cancelled.outcome.unwrap_err(), VmError::Cancelled);
    assert_eq!(ctx.registry().live_count(), 0);
    assert_eq!(controller.pending(), 0);
    assert!(controller.poll().is_empty());
    assert!(matches!(controller.cancel(token), Err(VmError::InvalidState(_))));
}

#[test]
fn test_cancelled_fiber_reports_cancelled() {
    let (ctx, semaphore) = setup();
    let mut fiber = fiber(&ctx, 1);
    assert!(matches!(fiber.run(), Ok(FiberStatus::Suspended(_))));

    assert_eq!(fiber.cancel().unwrap_err(), VmError::Cancelled);
    assert_eq!(fiber.state(), FiberState::Failed);
    assert_eq!(fiber.failure(), Some(&VmError::Cancelled));
    assert_eq!(fiber.depth(), 0);

    // Signalling afterwards does not revive it
    semaphore.signal(1).unwrap();
    assert_eq!(
        fiber.resume(WaitResolution::Signaled).unwrap_err(),
        VmError::Cancelled
    );
    assert_eq!(fiber.run_to_completion().unwrap_err(), VmError::Cancelled);
    assert_eq!(fiber.cancel().unwrap_err(), VmError::Cancelled);
}

#[test]
fn test_cancel_before_start() {
    let (ctx, _) = setup();
    let mut fiber = fiber(&ctx, 1);
    assert_eq!(fiber.cancel().unwrap_err(), VmError::Cancelled);
    assert_eq!(fiber.run().unwrap_err(), VmError::Cancelled);
}

#[test]
fn test_ready_fibers_resume_in_readiness_order() {
    let (ctx, semaphore) = setup();
    let mut controller = SuspensionController::new();
    let Outcome::Suspended(late) = controller.run(fiber(&ctx, 2)).unwrap() else {
        panic!("fiber should suspend");
    };
    let Outcome::Suspended(early) = controller.run(fiber(&ctx, 1)).unwrap() else {
        panic!("fiber should suspend");
    };
    assert!(late < early);

    semaphore.signal(1).unwrap();
    assert_eq!(controller.notify(&WaitCondition::semaphore(semaphore.clone(), 1, None)), 1);
    semaphore.signal(2).unwrap();
    assert_eq!(controller.notify(&WaitCondition::semaphore(semaphore.clone(), 2, None)), 1);

    let order: Vec<_> = controller.poll().into_iter().map(|r| r.token).collect();
    assert_eq!(order, vec![early, late]);
}

#[test]
fn test_resume_requires_suspended_fiber() {
    let (ctx, _) = setup();
    let mut fiber = fiber(&ctx, 1);
    assert!(matches!(
        fiber.resume(WaitResolution::Signaled),
        Err(VmError::InvalidState(_))
    ));
    fiber.run().unwrap();
    assert_eq!(fiber.state(), FiberState::Suspended);
    assert!(fiber.pending_condition().is_some());
    assert!(matches!(fiber.run(), Err(VmError::InvalidState(_))));
}

#[derive(Default)]
struct RecordingScheduler {
    events: Mutex<Vec<(&'static str, FiberId)>>,
}

impl HostScheduler for RecordingScheduler {
    fn on_suspend(&self, fiber: FiberId, _condition: &WaitCondition) {
        self.events.lock().push(("suspend", fiber));
    }

    fn resume(&self, fiber: FiberId) {
        self.events.lock().push(("resume", fiber));
    }
}

#[test]
fn test_scheduler_hooks() {
    let (ctx, semaphore) = setup();
    let scheduler = Arc::new(RecordingScheduler::default());
    let mut controller = SuspensionController::with_scheduler(scheduler.clone());

    let fiber = fiber(&ctx, 1);
    let id = fiber.id();
    controller.run(fiber).unwrap();
    semaphore.signal(1).unwrap();
    controller.notify(&WaitCondition::semaphore(semaphore, 1, None));

    assert_eq!(*scheduler.events.lock(), vec![("suspend", id), ("resume", id)]);
}

#[test]
fn test_run_to_completion_blocks_until_signaled() {
    let (ctx, semaphore) = setup();
    let signaller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        semaphore.signal(1).unwrap();
    });
    let result = ctx.invoke("app.main", vec![Value::I64(1)]).unwrap();
    signaller.join().unwrap();
    assert_eq!(result.into_values().unwrap(), vec![Value::I32(100)]);
}

#[tokio::test]
async fn test_run_async_awaits_condition() {
    let (ctx, semaphore) = setup();
    let signaller = semaphore.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        signaller.signal(1).unwrap();
    });
    let result = run_async(fiber(&ctx, 1)).await.unwrap();
    assert_eq!(result.into_values().unwrap(), vec![Value::I32(100)]);
    assert_eq!(semaphore.query().unwrap(), 1);
}

#[tokio::test]
async fn test_run_all_async_keeps_order() {
    let (ctx, semaphore) = setup();
    semaphore.signal(3).unwrap();
    let fibers = vec![
        fiber(&ctx, 1),
        Fiber::new(&ctx, "app.expired", vec![Value::I64(9)]).unwrap(),
    ];
    let results: Vec<_> = run_all_async(fibers)
        .await
        .into_iter()
        .map(|r| r.unwrap().into_values().unwrap())
        .collect();
    assert_eq!(results, vec![vec![Value::I32(100)], vec![Value::I32(104)]]);
}
