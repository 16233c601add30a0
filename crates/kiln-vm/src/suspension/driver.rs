//! Async driver for a single fiber.

use super::condition::WaitCondition;
use crate::error::VmError;
use crate::vm::{Fiber, FiberStatus};
use kiln_types::TypedList;
use tracing::trace;

/// Run `fiber` to completion, awaiting every wait condition on the
/// current tokio runtime instead of blocking a thread.
pub async fn run_async(mut fiber: Fiber) -> Result<TypedList, VmError> {
    let mut status = fiber.run()?;
    loop {
        match status {
            FiberStatus::Returned(list) => return Ok(list),
            FiberStatus::Suspended(condition) => {
                trace!(fiber = %fiber.id(), "awaiting condition");
                let resolution = WaitCondition::wait_async(&condition).await;
                status = fiber.resume(resolution)?;
            }
        }
    }
}

/// Drive several fibers concurrently on the current task; results come
/// back in the order the fibers were given.
pub async fn run_all_async(
    fibers: impl IntoIterator<Item = Fiber>,
) -> Vec<Result<TypedList, VmError>> {
    futures::future::join_all(fibers.into_iter().map(run_async)).await
}
