//! Timeline semaphores and fences.
//!
//! A semaphore holds a monotonically increasing `u64` payload. Waiters block
//! (or await) until the payload reaches a target value. Failing a semaphore
//! wakes every waiter with [`HalError::Aborted`].

use crate::error::{HalError, HalResult};
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use kiln_types::sync::{Arc, Condvar, Mutex};
use kiln_types::{Resource, ResourceKind};
use std::time::{Duration, Instant};
use tracing::warn;

/// Outcome of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

struct SemaphoreState {
    value: u64,
    failure: Option<String>,
    waiters: Vec<(u64, oneshot::Sender<()>)>,
}

pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new(initial_value: u64) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                value: initial_value,
                failure: None,
                waiters: Vec::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Current payload, or the failure that poisoned the timeline
    pub fn query(&self) -> HalResult<u64> {
        let state = self.state.lock();
        match &state.failure {
            Some(message) => Err(HalError::Aborted(message.clone())),
            None => Ok(state.value),
        }
    }

    /// Whether the payload has reached `value`
    pub fn is_reached(&self, value: u64) -> HalResult<bool> {
        Ok(self.query()? >= value)
    }

    /// Advance the payload to `value`, which must exceed the current one.
    pub fn signal(&self, value: u64) -> HalResult<()> {
        let woken = {
            let mut state = self.state.lock();
            if let Some(message) = &state.failure {
                return Err(HalError::Aborted(message.clone()));
            }
            if value <= state.value {
                return Err(HalError::InvalidArgument(format!(
                    "semaphore signal to {} does not advance past {}",
                    value, state.value
                )));
            }
            state.value = value;
            let (ready, pending): (Vec<_>, Vec<_>) = state
                .waiters
                .drain(..)
                .partition(|(target, _)| *target <= value);
            state.waiters = pending;
            ready
        };
        self.condvar.notify_all();
        for (_, sender) in woken {
            let _ = sender.send(());
        }
        Ok(())
    }

    /// Poison the timeline; every current and future wait fails.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "semaphore failed");
        let woken = {
            let mut state = self.state.lock();
            if state.failure.is_none() {
                state.failure = Some(message);
            }
            std::mem::take(&mut state.waiters)
        };
        self.condvar.notify_all();
        // Dropping the senders cancels the async waiters.
        drop(woken);
    }

    /// Block until the payload reaches `value` or `timeout` elapses.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> HalResult<WaitResult> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_until(value, deadline)
    }

    pub fn wait_until(&self, value: u64, deadline: Option<Instant>) -> HalResult<WaitResult> {
        let mut state = self.state.lock();
        loop {
            if let Some(message) = &state.failure {
                return Err(HalError::Aborted(message.clone()));
            }
            if state.value >= value {
                return Ok(WaitResult::Signaled);
            }
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut state, deadline).timed_out() {
                        if let Some(message) = &state.failure {
                            return Err(HalError::Aborted(message.clone()));
                        }
                        return Ok(if state.value >= value {
                            WaitResult::Signaled
                        } else {
                            WaitResult::TimedOut
                        });
                    }
                }
                None => self.condvar.wait(&mut state),
            }
        }
    }

    /// Resolve once the payload reaches `value` (or the timeline fails).
    pub fn wait_async(self: &Arc<Self>, value: u64) -> BoxFuture<'static, HalResult<()>> {
        let receiver = {
            let mut state = self.state.lock();
            if let Some(message) = &state.failure {
                return future::ready(Err(HalError::Aborted(message.clone()))).boxed();
            }
            if state.value >= value {
                return future::ready(Ok(())).boxed();
            }
            // Drop waiters whose futures were abandoned (timed out or dropped)
            state.waiters.retain(|(_, sender)| !sender.is_canceled());
            let (sender, receiver) = oneshot::channel();
            state.waiters.push((value, sender));
            receiver
        };

        let this = self.clone();
        async move {
            let _ = receiver.await;
            if this.is_reached(value)? {
                Ok(())
            } else {
                Err(HalError::FailedPrecondition(
                    "semaphore waiter woken before target".to_string(),
                ))
            }
        }
        .boxed()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("value", &state.value)
            .field("failure", &state.failure)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl Resource for Semaphore {
    const KIND: ResourceKind = ResourceKind::Semaphore;
}

/// A (semaphore, value) pair
#[derive(Debug, Clone)]
pub struct Timepoint {
    pub semaphore: Arc<Semaphore>,
    pub value: u64,
}

/// An immutable set of timepoints, reached when all of them are.
#[derive(Debug, Clone, Default)]
pub struct Fence {
    timepoints: Vec<Timepoint>,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(semaphore: Arc<Semaphore>, value: u64) -> Self {
        let mut fence = Self::new();
        fence.insert(semaphore, value);
        fence
    }

    /// Add a timepoint, keeping only the largest value per semaphore
    pub fn insert(&mut self, semaphore: Arc<Semaphore>, value: u64) {
        match self
            .timepoints
            .iter_mut()
            .find(|tp| Arc::ptr_eq(&tp.semaphore, &semaphore))
        {
            Some(existing) => existing.value = existing.value.max(value),
            None => self.timepoints.push(Timepoint { semaphore, value }),
        }
    }

    /// Union of two fences
    pub fn join(&self, other: &Fence) -> Fence {
        let mut joined = self.clone();
        for tp in &other.timepoints {
            joined.insert(tp.semaphore.clone(), tp.value);
        }
        joined
    }

    pub fn timepoints(&self) -> &[Timepoint] {
        &self.timepoints
    }

    pub fn is_empty(&self) -> bool {
        self.timepoints.is_empty()
    }

    /// Whether every timepoint has been reached
    pub fn query(&self) -> HalResult<bool> {
        for tp in &self.timepoints {
            if !tp.semaphore.is_reached(tp.value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Signal every timepoint that has not been reached yet
    pub fn signal(&self) -> HalResult<()> {
        for tp in &self.timepoints {
            if !tp.semaphore.is_reached(tp.value)? {
                tp.semaphore.signal(tp.value)?;
            }
        }
        Ok(())
    }

    /// Fail every semaphore in the fence
    pub fn fail(&self, message: &str) {
        for tp in &self.timepoints {
            tp.semaphore.fail(message);
        }
    }

    pub fn wait_until(&self, deadline: Option<Instant>) -> HalResult<WaitResult> {
        for tp in &self.timepoints {
            if tp.semaphore.wait_until(tp.value, deadline)? == WaitResult::TimedOut {
                return Ok(WaitResult::TimedOut);
            }
        }
        Ok(WaitResult::Signaled)
    }

    pub fn wait_async(&self) -> BoxFuture<'static, HalResult<()>> {
        let waits: Vec<_> = self
            .timepoints
            .iter()
            .map(|tp| tp.semaphore.wait_async(tp.value))
            .collect();
        async move {
            for result in future::join_all(waits).await {
                result?;
            }
            Ok(())
        }
        .boxed()
    }
}

impl Resource for Fence {
    const KIND: ResourceKind = ResourceKind::Fence;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_must_advance() {
        let semaphore = Semaphore::new(2);
        assert!(semaphore.signal(2).is_err());
        semaphore.signal(5).unwrap();
        assert_eq!(semaphore.query().unwrap(), 5);
    }

    #[test]
    fn test_wait_times_out() {
        let semaphore = Semaphore::new(0);
        let result = semaphore.wait(1, Some(Duration::from_millis(5))).unwrap();
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn test_wait_wakes_on_signal_from_other_thread() {
        let semaphore = Arc::new(Semaphore::new(0));
        let signaler = {
            let semaphore = semaphore.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                semaphore.signal(3).unwrap();
            })
        };
        assert_eq!(semaphore.wait(3, None).unwrap(), WaitResult::Signaled);
        signaler.join().unwrap();
    }

    #[test]
    fn test_failure_wakes_waiters() {
        let semaphore = Arc::new(Semaphore::new(0));
        let failer = {
            let semaphore = semaphore.clone();
            thread::spawn(move || semaphore.fail("device lost"))
        };
        let err = semaphore.wait(1, None).unwrap_err();
        assert_eq!(err, HalError::Aborted("device lost".to_string()));
        failer.join().unwrap();
        assert!(semaphore.signal(1).is_err());
    }

    #[test]
    fn test_wait_async_resolves() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let semaphore = Arc::new(Semaphore::new(0));
        let waiting = semaphore.wait_async(2);
        semaphore.signal(1).unwrap();
        semaphore.signal(2).unwrap();
        rt.block_on(async { waiting.await.unwrap() });
    }

    #[test]
    fn test_abandoned_async_waits_are_pruned() {
        let semaphore = Arc::new(Semaphore::new(0));
        for _ in 0..100 {
            drop(semaphore.wait_async(1));
        }
        assert_eq!(semaphore.state.lock().waiters.len(), 1);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let timed_out = rt.block_on(async {
            tokio::time::timeout(Duration::from_millis(1), semaphore.wait_async(1)).await
        });
        assert!(timed_out.is_err());
        let live = semaphore.wait_async(1);
        assert_eq!(semaphore.state.lock().waiters.len(), 1);

        semaphore.signal(1).unwrap();
        rt.block_on(async { live.await.unwrap() });
    }

    #[test]
    fn test_fence_join_keeps_max() {
        let a = Arc::new(Semaphore::new(0));
        let b = Arc::new(Semaphore::new(0));
        let fence = Fence::at(a.clone(), 1).join(&Fence::at(a.clone(), 3).join(&Fence::at(b.clone(), 1)));
        assert_eq!(fence.timepoints().len(), 2);
        assert!(!fence.query().unwrap());

        fence.signal().unwrap();
        assert_eq!(a.query().unwrap(), 3);
        assert_eq!(b.query().unwrap(), 1);
        assert!(fence.query().unwrap());
        assert_eq!(fence.wait_until(None).unwrap(), WaitResult::Signaled);
    }
}
