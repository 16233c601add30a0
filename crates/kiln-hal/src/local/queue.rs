//! Submission queue of the local device.

use crate::command_buffer::Command;
use crate::device::SubmissionBatch;
use crate::error::{HalError, HalResult};
use crate::executable::DispatchContext;
use crate::semaphore::WaitResult;
use kiln_types::sync::{Arc, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

pub(crate) enum Queue {
    /// Batches run on the submitting thread; a batch must be ready to run
    Inline,
    /// Batches run in order on a worker thread
    Threaded {
        sender: Mutex<Option<mpsc::Sender<SubmissionBatch>>>,
        worker: Mutex<Option<JoinHandle<()>>>,
    },
    /// Batches run when the host calls `run_pending`
    Manual {
        pending: Mutex<VecDeque<SubmissionBatch>>,
    },
}

impl Queue {
    pub(crate) fn threaded(device_id: &str) -> HalResult<Self> {
        let (sender, receiver) = mpsc::channel::<SubmissionBatch>();
        let worker = std::thread::Builder::new()
            .name(format!("{}-queue", device_id))
            .spawn(move || {
                for batch in receiver {
                    // Failures are reported through the signal fence.
                    let _ = execute_batch(&batch);
                }
            })
            .map_err(|e| HalError::Device(format!("spawning queue worker: {}", e)))?;
        Ok(Queue::Threaded {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub(crate) fn submit(&self, batch: SubmissionBatch) -> HalResult<()> {
        match self {
            Queue::Inline => match batch.wait.query() {
                Ok(false) => Err(HalError::FailedPrecondition(
                    "wait fence not reached; inline queues cannot defer a batch".to_string(),
                )),
                Ok(true) | Err(_) => execute_batch(&batch),
            },
            Queue::Threaded { sender, .. } => {
                let sender = sender.lock();
                let sender = sender
                    .as_ref()
                    .ok_or_else(|| HalError::FailedPrecondition("queue shut down".to_string()))?;
                sender
                    .send(batch)
                    .map_err(|_| HalError::Device("queue worker exited".to_string()))
            }
            Queue::Manual { pending } => {
                pending.lock().push_back(batch);
                Ok(())
            }
        }
    }

    /// Execute queued batches in submission order, stopping at the first
    /// whose wait fence is not yet reached. Returns the number executed.
    pub(crate) fn run_pending(&self) -> usize {
        let Queue::Manual { pending } = self else {
            return 0;
        };
        let mut executed = 0;
        loop {
            let batch = {
                let mut pending = pending.lock();
                match pending.front() {
                    Some(front) => match front.wait.query() {
                        Ok(false) => break,
                        Ok(true) | Err(_) => pending.pop_front(),
                    },
                    None => break,
                }
            };
            if let Some(batch) = batch {
                let _ = execute_batch(&batch);
                executed += 1;
            }
        }
        executed
    }

    pub(crate) fn pending_count(&self) -> usize {
        match self {
            Queue::Manual { pending } => pending.lock().len(),
            _ => 0,
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Queue::Threaded { sender, worker } = self {
            sender.lock().take();
            if let Some(worker) = worker.lock().take() {
                let _ = worker.join();
            }
        }
    }
}

/// Run one batch to completion, signalling or failing its signal fence.
pub(crate) fn execute_batch(batch: &SubmissionBatch) -> HalResult<()> {
    let result = batch
        .wait
        .wait_until(None)
        .and_then(|waited| match waited {
            WaitResult::Signaled => Ok(()),
            WaitResult::TimedOut => Err(HalError::DeadlineExceeded),
        })
        .and_then(|()| {
            for cb in &batch.command_buffers {
                execute_commands(&cb.commands()?)?;
            }
            Ok(())
        });

    match result {
        Ok(()) => {
            debug!(
                command_buffers = batch.command_buffers.len(),
                "batch complete"
            );
            batch.signal.signal()
        }
        Err(err) => {
            warn!(error = %err, "batch failed");
            batch.signal.fail(&err.to_string());
            Err(err)
        }
    }
}

fn execute_commands(commands: &[Command]) -> HalResult<()> {
    let mut bound_sets = BTreeMap::new();
    let mut push_constants: Vec<u32> = Vec::new();

    for command in commands {
        trace!(?command, "execute");
        match command {
            Command::FillBuffer {
                target,
                offset,
                length,
                pattern,
            } => target.fill(*offset, *length, pattern)?,
            Command::CopyBuffer {
                source,
                source_offset,
                target,
                target_offset,
                length,
            } => target.copy_from(source, *source_offset, *target_offset, *length)?,
            Command::UpdateBuffer {
                data,
                target,
                offset,
            } => target.write(*offset, data)?,
            // Commands already execute in order.
            Command::ExecutionBarrier => {}
            Command::SignalEvent(event) => event.signal(),
            Command::ResetEvent(event) => event.reset(),
            Command::PushConstants {
                layout,
                offset,
                values,
            } => {
                if push_constants.len() < layout.push_constants() {
                    push_constants.resize(layout.push_constants(), 0);
                }
                push_constants[*offset..*offset + values.len()].copy_from_slice(values);
            }
            Command::BindDescriptorSet {
                set,
                descriptor_set,
                ..
            } => {
                bound_sets.insert(*set, descriptor_set.clone());
            }
            Command::Dispatch {
                executable,
                entry_point,
                workgroups,
            } => {
                let kernel = executable.entry_point(*entry_point)?;
                let bindings: Vec<Arc<_>> = bound_sets
                    .values()
                    .flat_map(|set| set.bindings().iter().cloned())
                    .collect();
                kernel(&DispatchContext {
                    workgroup_count: *workgroups,
                    bindings: &bindings,
                    push_constants: &push_constants,
                })?;
            }
        }
    }
    Ok(())
}
