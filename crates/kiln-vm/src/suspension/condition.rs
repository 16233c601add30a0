//! Wait conditions a native call can suspend a fiber on.

use kiln_hal::{Fence, HalError, Semaphore, WaitResult};
use kiln_types::sync::Arc;
use std::time::Instant;

/// What a suspended fiber is waiting for.
#[derive(Debug, Clone)]
pub enum WaitCondition {
    /// Semaphore payload reaching `value`
    Semaphore {
        semaphore: Arc<Semaphore>,
        value: u64,
        deadline: Option<Instant>,
    },
    /// Every timepoint of a fence
    Fence {
        fence: Fence,
        deadline: Option<Instant>,
    },
    /// Nothing but time
    Deadline(Instant),
}

/// How a wait ended; handed to the pending continuation on resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitResolution {
    Signaled,
    TimedOut,
    /// The awaited timeline failed; carries the device's error verbatim
    Failed(HalError),
}

impl WaitResolution {
    /// Status code for the resolution: 0 OK, 4 deadline exceeded, else the
    /// failure's own code
    pub fn status_code(&self) -> i32 {
        match self {
            WaitResolution::Signaled => 0,
            WaitResolution::TimedOut => 4,
            WaitResolution::Failed(err) => err.status_code(),
        }
    }
}

impl From<kiln_hal::HalResult<WaitResult>> for WaitResolution {
    fn from(result: kiln_hal::HalResult<WaitResult>) -> Self {
        match result {
            Ok(WaitResult::Signaled) => WaitResolution::Signaled,
            Ok(WaitResult::TimedOut) => WaitResolution::TimedOut,
            Err(err) => WaitResolution::Failed(err),
        }
    }
}

impl WaitCondition {
    pub fn semaphore(semaphore: Arc<Semaphore>, value: u64, deadline: Option<Instant>) -> Self {
        WaitCondition::Semaphore {
            semaphore,
            value,
            deadline,
        }
    }

    pub fn fence(fence: Fence, deadline: Option<Instant>) -> Self {
        WaitCondition::Fence { fence, deadline }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WaitCondition::Semaphore { deadline, .. } | WaitCondition::Fence { deadline, .. } => {
                *deadline
            }
            WaitCondition::Deadline(at) => Some(*at),
        }
    }

    /// Resolve without blocking, or `None` while still pending.
    pub fn try_resolve(&self) -> Option<WaitResolution> {
        let reached = match self {
            WaitCondition::Semaphore {
                semaphore, value, ..
            } => semaphore.is_reached(*value),
            WaitCondition::Fence { fence, .. } => fence.query(),
            WaitCondition::Deadline(_) => Ok(false),
        };
        match reached {
            Err(err) => Some(WaitResolution::Failed(err)),
            Ok(true) => Some(WaitResolution::Signaled),
            Ok(false) => match self.deadline() {
                Some(deadline) if Instant::now() >= deadline => Some(WaitResolution::TimedOut),
                _ => None,
            },
        }
    }

    /// Block the current thread until the condition resolves.
    pub fn wait_blocking(&self) -> WaitResolution {
        match self {
            WaitCondition::Semaphore {
                semaphore,
                value,
                deadline,
            } => semaphore.wait_until(*value, *deadline).into(),
            WaitCondition::Fence { fence, deadline } => fence.wait_until(*deadline).into(),
            WaitCondition::Deadline(at) => {
                let now = Instant::now();
                if *at > now {
                    std::thread::sleep(*at - now);
                }
                WaitResolution::TimedOut
            }
        }
    }

    /// Await the condition on a tokio runtime.
    pub async fn wait_async(&self) -> WaitResolution {
        let wait = match self {
            WaitCondition::Semaphore {
                semaphore, value, ..
            } => semaphore.wait_async(*value),
            WaitCondition::Fence { fence, .. } => fence.wait_async(),
            WaitCondition::Deadline(at) => {
                tokio::time::sleep_until((*at).into()).await;
                return WaitResolution::TimedOut;
            }
        };
        let result = match self.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline.into(), wait).await {
                Ok(result) => result,
                Err(_) => return WaitResolution::TimedOut,
            },
            None => wait.await,
        };
        match result {
            Ok(()) => WaitResolution::Signaled,
            Err(err) => WaitResolution::Failed(err),
        }
    }

    /// Whether `notified` being reached implies this condition is.
    ///
    /// A semaphore wait is covered by any notification of the same
    /// semaphore at an equal or later value; a fence by notifications
    /// covering each of its timepoints.
    pub fn is_satisfied_by(&self, notified: &WaitCondition) -> bool {
        match (self, notified) {
            (WaitCondition::Deadline(mine), WaitCondition::Deadline(theirs)) => theirs >= mine,
            (WaitCondition::Deadline(_), _) | (_, WaitCondition::Deadline(_)) => false,
            _ => {
                let covered = notified.timepoints();
                self.timepoints().iter().all(|(semaphore, value)| {
                    covered
                        .iter()
                        .any(|(other, reached)| Arc::ptr_eq(semaphore, other) && reached >= value)
                })
            }
        }
    }

    fn timepoints(&self) -> Vec<(Arc<Semaphore>, u64)> {
        match self {
            WaitCondition::Semaphore {
                semaphore, value, ..
            } => vec![(semaphore.clone(), *value)],
            WaitCondition::Fence { fence, .. } => fence
                .timepoints()
                .iter()
                .map(|tp| (tp.semaphore.clone(), tp.value))
                .collect(),
            WaitCondition::Deadline(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_resolve_tracks_semaphore() {
        let sem = Arc::new(Semaphore::new(0));
        let cond = WaitCondition::semaphore(sem.clone(), 2, None);
        assert_eq!(cond.try_resolve(), None);

        sem.signal(2).unwrap();
        assert_eq!(cond.try_resolve(), Some(WaitResolution::Signaled));

        let failed = Arc::new(Semaphore::new(0));
        failed.fail("device lost");
        let cond = WaitCondition::semaphore(failed, 1, None);
        assert_eq!(
            cond.try_resolve(),
            Some(WaitResolution::Failed(HalError::Aborted("device lost".into())))
        );
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let sem = Arc::new(Semaphore::new(0));
        let past = Instant::now() - Duration::from_millis(1);
        let cond = WaitCondition::semaphore(sem, 1, Some(past));
        assert_eq!(cond.try_resolve(), Some(WaitResolution::TimedOut));
        assert_eq!(cond.wait_blocking(), WaitResolution::TimedOut);
    }

    #[test]
    fn test_satisfaction_by_notification() {
        let a = Arc::new(Semaphore::new(0));
        let b = Arc::new(Semaphore::new(0));
        let wait_a3 = WaitCondition::semaphore(a.clone(), 3, None);

        assert!(wait_a3.is_satisfied_by(&WaitCondition::semaphore(a.clone(), 3, None)));
        assert!(wait_a3.is_satisfied_by(&WaitCondition::semaphore(a.clone(), 5, None)));
        assert!(!wait_a3.is_satisfied_by(&WaitCondition::semaphore(a.clone(), 2, None)));
        assert!(!wait_a3.is_satisfied_by(&WaitCondition::semaphore(b.clone(), 9, None)));

        let mut fence = Fence::at(a.clone(), 1);
        fence.insert(b.clone(), 1);
        let wait_fence = WaitCondition::fence(fence.clone(), None);
        assert!(!wait_fence.is_satisfied_by(&WaitCondition::semaphore(a, 1, None)));
        assert!(wait_fence.is_satisfied_by(&WaitCondition::fence(fence, None)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(WaitResolution::Signaled.status_code(), 0);
        assert_eq!(WaitResolution::TimedOut.status_code(), 4);
        assert_eq!(WaitResolution::Failed(HalError::Aborted("x".into())).status_code(), 10);
        assert_eq!(WaitResolution::Failed(HalError::Device("x".into())).status_code(), 13);
    }
}
