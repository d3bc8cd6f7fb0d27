//! Callback worker pool
//!
//! Async completions run here, off the transport's reader thread, so a slow
//! callback cannot stall reads.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct CallbackPool {
    jobs: Mutex<Option<Sender<Job>>>,
    exited: Receiver<()>,
    threads: usize,
}

impl CallbackPool {
    /// Start `threads` workers (0 = available parallelism)
    pub(crate) fn new(threads: usize) -> Result<Self> {
        let threads = if threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
        } else {
            threads
        };

        let (tx, rx) = unbounded::<Job>();
        let (exit_tx, exit_rx) = unbounded();
        for i in 0..threads {
            let rx = rx.clone();
            let exit_tx = exit_tx.clone();
            thread::Builder::new()
                .name(format!("kinetic-callback-{}", i))
                .spawn(move || {
                    for job in rx.iter() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::warn!("Async completion callback panicked");
                        }
                    }
                    let _ = exit_tx.send(());
                })?;
        }

        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            exited: exit_rx,
            threads,
        })
    }

    /// Queue a job; after shutdown the job runs on the caller's thread
    pub(crate) fn execute(&self, job: Job) {
        let job = match &*self.jobs.lock() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(rejected) => rejected.0,
            },
            None => job,
        };
        job();
    }

    /// Stop accepting jobs and wait up to `await_timeout` per worker for the
    /// queue to drain
    pub(crate) fn shutdown(&self, await_timeout: Duration) {
        if self.jobs.lock().take().is_none() {
            return;
        }
        for _ in 0..self.threads {
            if self.exited.recv_timeout(await_timeout).is_err() {
                tracing::debug!("Callback workers still busy after {:?}", await_timeout);
                return;
            }
        }
    }
}
