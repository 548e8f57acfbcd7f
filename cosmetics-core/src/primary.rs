//! The primary execution context.
//!
//! World-mutating side effects must run on the same context as the host's
//! engine APIs. This module models that context as one dedicated thread that
//! runs submitted closures serially, in submission order. Callers on any
//! other context marshal work onto it with [`PrimaryContext::run`] and await
//! the result.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::ThreadId;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::PrimaryError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the primary execution context.
///
/// Cheap to share behind an `Arc`. The worker thread exits once every handle
/// is dropped and the queue is drained.
pub struct PrimaryContext {
    /// Job queue feeding the worker thread
    tx: mpsc::UnboundedSender<Job>,
    /// Worker thread id, for `is_current`
    thread_id: ThreadId,
}

impl PrimaryContext {
    /// Start the primary context on a new thread.
    ///
    /// When called inside a tokio runtime, each job runs with that runtime
    /// entered so side effects may spawn background tasks.
    pub fn start(name: &str) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let _guard = runtime.as_ref().map(|h| h.enter());
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Job panicked on primary context");
                    }
                }
                debug!("Primary context drained");
            })?;

        Ok(Self {
            tx,
            thread_id: worker.thread().id(),
        })
    }

    /// Run `f` on the primary context and await its result.
    ///
    /// Fails only if the context has shut down or the job panicked.
    pub async fn run<F, T>(&self, f: F) -> Result<T, PrimaryError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = done_tx.send(f());
            }))
            .map_err(|_| PrimaryError)?;
        done_rx.await.map_err(|_| PrimaryError)
    }

    /// Queue `f` without waiting for it.
    pub fn submit<F>(&self, f: F) -> Result<(), PrimaryError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(f)).map_err(|_| PrimaryError)
    }

    /// Whether the caller is running on the primary context.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }
}
