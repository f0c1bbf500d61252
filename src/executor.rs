//! Background executor for engine callbacks.
//!
//! Every asynchronous step in the engine — backend completions, fan-in
//! callbacks, retry re-dispatch — runs as a job on this pool. Callers must
//! never assume a callback arrives on their own thread.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool fed by a single shared channel.
///
/// Jobs are plain closures; no job may block waiting on another job's
/// completion (the engine is continuation-passing throughout), so even a
/// single worker cannot deadlock — it only serializes.
pub struct Executor {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Spawn a pool with the given number of worker threads (at least one).
    pub fn new(workers: usize) -> Arc<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("treesync-worker-{}", n))
                .spawn(move || worker_loop(receiver))
                .expect("failed to spawn executor worker");
            handles.push(handle);
        }

        Arc::new(Executor {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Queue a job for execution on a worker thread.
    ///
    /// Jobs submitted after shutdown are dropped silently.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Ok(guard) = self.sender.lock() {
            if let Some(sender) = guard.as_ref() {
                let _ = sender.send(Box::new(job));
            }
        }
    }

    /// Queue a job after a delay. Used by retry policies for backoff.
    ///
    /// The timer runs on a detached thread so no pool worker is parked
    /// while waiting.
    pub fn execute_after(self: &Arc<Self>, delay: Duration, job: impl FnOnce() + Send + 'static) {
        if delay.is_zero() {
            self.execute(job);
            return;
        }
        let executor = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(delay);
            executor.execute(job);
        });
    }

    /// Stop accepting jobs and wait for in-flight jobs to finish.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Close the channel so workers drain and exit; don't join here —
        // the last handle may be dropped from inside a worker's own job.
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = match receiver.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            // Channel closed: all senders dropped, shut down.
            Err(_) => return,
        }
    }
}
