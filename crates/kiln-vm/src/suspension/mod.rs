//! Suspension and resumption of fibers.
//!
//! A fiber that suspends on a [`WaitCondition`] is parked here under a
//! [`SuspensionToken`]. The host either reports progress with
//! [`SuspensionController::notify`] or lets [`SuspensionController::poll`]
//! check the conditions itself; ready fibers are then resumed in the order
//! they became ready.

pub mod condition;
mod driver;

pub use condition::{WaitCondition, WaitResolution};
pub use driver::{run_all_async, run_async};

use crate::error::VmError;
use crate::vm::{Fiber, FiberId, FiberState, FiberStatus};
use kiln_types::sync::Arc;
use kiln_types::TypedList;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Names one parked fiber; consumed by resume or cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuspensionToken(u64);

impl SuspensionToken {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SuspensionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Hooks the host provides to learn about parked and ready fibers.
pub trait HostScheduler: Send + Sync {
    /// A fiber was parked on `condition`
    fn on_suspend(&self, _fiber: FiberId, _condition: &WaitCondition) {}

    /// A parked fiber became ready; the host should call `poll` soon
    fn resume(&self, _fiber: FiberId) {}
}

/// Result of driving a fiber through the controller
#[derive(Debug)]
pub enum Outcome {
    Returned(TypedList),
    Suspended(SuspensionToken),
}

/// One fiber resumed by [`SuspensionController::poll`]
#[derive(Debug)]
pub struct Resumed {
    pub token: SuspensionToken,
    pub fiber: FiberId,
    pub outcome: Result<Outcome, VmError>,
}

struct Parked {
    fiber: Fiber,
    condition: WaitCondition,
    /// Readiness sequence number and resolution once ready
    ready: Option<(u64, WaitResolution)>,
}

/// Owns parked fibers until their conditions resolve.
#[derive(Default)]
pub struct SuspensionController {
    parked: BTreeMap<SuspensionToken, Parked>,
    next_token: u64,
    next_ready: u64,
    scheduler: Option<Arc<dyn HostScheduler>>,
}

impl SuspensionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler(scheduler: Arc<dyn HostScheduler>) -> Self {
        Self {
            scheduler: Some(scheduler),
            ..Self::default()
        }
    }

    /// Start `fiber`; park it if it suspends.
    pub fn run(&mut self, mut fiber: Fiber) -> Result<Outcome, VmError> {
        match fiber.run()? {
            FiberStatus::Returned(list) => Ok(Outcome::Returned(list)),
            FiberStatus::Suspended(condition) => {
                self.await_condition(fiber, condition).map(Outcome::Suspended)
            }
        }
    }

    /// Park a suspended fiber until `condition` resolves.
    pub fn await_condition(
        &mut self,
        fiber: Fiber,
        condition: WaitCondition,
    ) -> Result<SuspensionToken, VmError> {
        if fiber.state() != FiberState::Suspended {
            return Err(VmError::InvalidState(format!(
                "cannot park {} in state {:?}",
                fiber.id(),
                fiber.state()
            )));
        }
        self.next_token += 1;
        let token = SuspensionToken(self.next_token);
        if let Some(scheduler) = &self.scheduler {
            scheduler.on_suspend(fiber.id(), &condition);
        }
        debug!(%token, fiber = %fiber.id(), "fiber parked");
        self.parked.insert(
            token,
            Parked {
                fiber,
                condition,
                ready: None,
            },
        );
        Ok(token)
    }

    /// Mark every parked fiber whose condition `notified` satisfies as
    /// ready. Returns how many became ready.
    pub fn notify(&mut self, notified: &WaitCondition) -> usize {
        let mut count = 0;
        for parked in self.parked.values_mut() {
            if parked.ready.is_some() || !parked.condition.is_satisfied_by(notified) {
                continue;
            }
            self.next_ready += 1;
            parked.ready = Some((self.next_ready, WaitResolution::Signaled));
            if let Some(scheduler) = &self.scheduler {
                scheduler.resume(parked.fiber.id());
            }
            count += 1;
        }
        debug!(ready = count, "notify");
        count
    }

    /// Check pending conditions without blocking, then resume every ready
    /// fiber in the order it became ready.
    pub fn poll(&mut self) -> Vec<Resumed> {
        for parked in self.parked.values_mut() {
            if parked.ready.is_some() {
                continue;
            }
            if let Some(resolution) = parked.condition.try_resolve() {
                self.next_ready += 1;
                parked.ready = Some((self.next_ready, resolution));
                if let Some(scheduler) = &self.scheduler {
                    scheduler.resume(parked.fiber.id());
                }
            }
        }

        let mut ready: Vec<(u64, SuspensionToken)> = self
            .parked
            .iter()
            .filter_map(|(token, parked)| parked.ready.as_ref().map(|(seq, _)| (*seq, *token)))
            .collect();
        ready.sort_unstable();

        let mut resumed = Vec::with_capacity(ready.len());
        for (_, token) in ready {
            let Some(parked) = self.parked.remove(&token) else {
                continue;
            };
            let Parked {
                mut fiber, ready, ..
            } = parked;
            let resolution = match ready {
                Some((_, resolution)) => resolution,
                None => continue,
            };
            let fiber_id = fiber.id();
            debug!(%token, fiber = %fiber_id, ?resolution, "resuming fiber");
            let outcome = match fiber.resume(resolution) {
                Ok(FiberStatus::Returned(list)) => Ok(Outcome::Returned(list)),
                Ok(FiberStatus::Suspended(condition)) => {
                    self.await_condition(fiber, condition).map(Outcome::Suspended)
                }
                Err(err) => Err(err),
            };
            resumed.push(Resumed {
                token,
                fiber: fiber_id,
                outcome,
            });
        }
        resumed
    }

    /// Drop a parked fiber without resuming it. The returned record carries
    /// the fiber's terminal `Cancelled` failure.
    pub fn cancel(&mut self, token: SuspensionToken) -> Result<Resumed, VmError> {
        let mut parked = self
            .parked
            .remove(&token)
            .ok_or_else(|| VmError::InvalidState(format!("{} is not parked", token)))?;
        let fiber_id = parked.fiber.id();
        let outcome = parked.fiber.cancel().and_then(|status| match status {
            FiberStatus::Returned(list) => Ok(Outcome::Returned(list)),
            FiberStatus::Suspended(_) => Err(VmError::InvalidState(format!(
                "{} suspended while cancelled",
                fiber_id
            ))),
        });
        debug!(%token, fiber = %fiber_id, "parked fiber cancelled");
        Ok(Resumed {
            token,
            fiber: fiber_id,
            outcome,
        })
    }

    /// Number of parked fibers
    pub fn pending(&self) -> usize {
        self.parked.len()
    }

    pub fn is_parked(&self, token: SuspensionToken) -> bool {
        self.parked.contains_key(&token)
    }
}

impl fmt::Debug for SuspensionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspensionController")
            .field("parked", &self.parked.keys().collect::<Vec<_>>())
            .field("has_scheduler", &self.scheduler.is_some())
            .finish()
    }
}
