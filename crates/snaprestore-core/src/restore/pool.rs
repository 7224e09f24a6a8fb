//! Bounded pool of restore workers
//!
//! Workers pull node tasks from a dispatch channel and push one completion
//! per task back to the scheduler. Both channels hold at most one message
//! per worker, so a worker never blocks on reporting a finished task.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::node::{NodeOutcome, NodeRestorer};
use super::task::NodeTask;
use crate::error::RestoreError;

/// A finished node task, reported back to the scheduler
#[derive(Debug)]
pub struct Completion {
    pub worker: usize,
    pub task: NodeTask,
    pub outcome: Result<NodeOutcome, RestoreError>,
}

pub struct WorkerPool {
    dispatch: Option<Sender<NodeTask>>,
    completions: Receiver<Completion>,
    workers: Vec<(usize, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawn `count` workers sharing `restorer`
    pub fn start(count: usize, restorer: Arc<NodeRestorer>) -> Result<Self, RestoreError> {
        let (dispatch_tx, dispatch_rx) = bounded::<NodeTask>(count);
        let (done_tx, done_rx) = bounded::<Completion>(count);

        let mut pool = Self {
            dispatch: Some(dispatch_tx),
            completions: done_rx,
            workers: Vec::with_capacity(count),
        };

        for id in 0..count {
            let tasks = dispatch_rx.clone();
            let done = done_tx.clone();
            let restorer = Arc::clone(&restorer);
            // on error `pool` drops here, which stops the workers already running
            let handle = thread::Builder::new()
                .name(format!("restore-{}", id))
                .spawn(move || worker_loop(id, tasks, done, restorer))
                .map_err(|source| RestoreError::WorkerSpawn { id, source })?;
            pool.workers.push((id, handle));
        }

        tracing::debug!("Started {} restore workers", count);
        Ok(pool)
    }

    /// Hand a task to an idle worker. The caller tracks availability.
    pub fn dispatch(&self, task: NodeTask) -> Result<(), RestoreError> {
        let sender = self.dispatch.as_ref().ok_or(RestoreError::ChannelClosed)?;
        sender.send(task).map_err(|_| RestoreError::ChannelClosed)
    }

    /// Block until some worker finishes a task
    pub fn recv(&self) -> Result<Completion, RestoreError> {
        self.completions
            .recv()
            .map_err(|_| RestoreError::ChannelClosed)
    }

    /// Wait for `in_flight` outstanding completions, then close the
    /// dispatch channel and join every worker.
    pub fn shutdown(mut self, in_flight: usize) -> Result<(), RestoreError> {
        for _ in 0..in_flight {
            match self.completions.recv() {
                Ok(completion) => {
                    if let Err(err) = &completion.outcome {
                        tracing::debug!(
                            "Discarding result of {} from worker {}: {}",
                            completion.task.rel_path().display(),
                            completion.worker,
                            err
                        );
                    }
                }
                // every worker is gone
                Err(_) => break,
            }
        }

        self.dispatch.take();
        let mut result = Ok(());
        for (id, handle) in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                let err = RestoreError::WorkerPanicked {
                    id,
                    message: panic_message(payload.as_ref()),
                };
                tracing::error!("{}", err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispatch.take();
        for (_, handle) in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    tasks: Receiver<NodeTask>,
    done: Sender<Completion>,
    restorer: Arc<NodeRestorer>,
) {
    for task in tasks.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| restorer.restore_node(&task)))
            .unwrap_or_else(|payload| {
                Err(RestoreError::WorkerPanicked {
                    id,
                    message: panic_message(payload.as_ref()),
                })
            });

        if done
            .send(Completion {
                worker: id,
                task,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
    tracing::trace!("Worker {} exiting", id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
