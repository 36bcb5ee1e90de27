//! Dedicated execution contexts for plugin roles.
//!
//! Each registered protocol gets one thread per role. Jobs queue on a bounded
//! channel and run in submission order; a panicking job is logged and the
//! thread moves on to the next one, so a faulty adapter cannot stall the
//! other protocols or take its own executor down.
//!
//! Submission never blocks. A full backlog is reported as
//! [`ExecutorError::Full`] and the caller decides what to shed, so a slow
//! adapter can neither stall another protocol's thread nor deadlock two
//! executors that feed each other.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

const EXECUTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::executor");

/// Unit of work run on an executor thread.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised by executor threads.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The thread could not be spawned.
    #[error("failed to spawn executor '{name}': {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying spawn failure.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The backlog is full.
    #[error("executor '{name}' backlog is full")]
    Full {
        /// Thread name.
        name: String,
    },
    /// The executor no longer accepts jobs.
    #[error("executor '{name}' is shut down")]
    Closed {
        /// Thread name.
        name: String,
    },
    /// The executor thread panicked outside a job.
    #[error("executor '{name}' panicked")]
    ThreadPanic {
        /// Thread name.
        name: String,
    },
}

/// Single-threaded, bounded job queue.
#[derive(Debug)]
pub(crate) struct RoleExecutor {
    name: String,
    sender: Mutex<Option<SyncSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoleExecutor {
    /// Spawns the executor thread.
    pub(crate) fn spawn(name: String, backlog: usize) -> Result<Self, ExecutorError> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(backlog);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(target: EXECUTOR_TARGET, executor = %thread_name, "executor active");
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(
                            target: EXECUTOR_TARGET,
                            executor = %thread_name,
                            "job panicked"
                        );
                    }
                }
                debug!(target: EXECUTOR_TARGET, executor = %thread_name, "executor drained");
            })
            .map_err(|source| ExecutorError::Spawn {
                name: name.clone(),
                source: Arc::new(source),
            })?;
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Thread name.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Queues a job without waiting for room in the backlog.
    pub(crate) fn submit(&self, job: Job) -> Result<(), ExecutorError> {
        let sender = self.sender.lock().clone();
        let name = self.name.clone();
        let Some(sender) = sender else {
            return Err(ExecutorError::Closed { name });
        };
        sender.try_send(job).map_err(|error| match error {
            TrySendError::Full(_) => ExecutorError::Full { name },
            TrySendError::Disconnected(_) => ExecutorError::Closed { name },
        })
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    ///
    /// Called from the executor's own thread, the wait is skipped.
    pub(crate) fn shutdown(&self) -> Result<(), ExecutorError> {
        drop(self.sender.lock().take());
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        handle.join().map_err(|_| ExecutorError::ThreadPanic {
            name: self.name.clone(),
        })
    }
}

impl Drop for RoleExecutor {
    fn drop(&mut self) {
        drop(self.sender.get_mut().take());
    }
}
