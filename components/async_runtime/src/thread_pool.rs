//! Worker threads for blocking native work.
//!
//! Blocking operations (file reads, stats) run here and never touch script
//! state. Each job produces a [`NativeEvent`](crate::NativeEvent) that the
//! caller posts back to the loop thread.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of named worker threads, started on first use.
pub struct ThreadPool {
    size: usize,
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ThreadPool {
    /// Creates a pool of `size` workers (at least one). No thread is spawned
    /// until the first job is submitted.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            size: size.max(1),
            name: name.into(),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of worker threads this pool runs.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues a job. Returns false once the pool has been shut down or a
    /// worker could not be spawned.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut sender = self.sender.lock();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if sender.is_none() {
            match self.start() {
                Some(tx) => *sender = Some(tx),
                None => return false,
            }
        }
        match sender.as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    fn start(&self) -> Option<Sender<Job>> {
        let (tx, rx) = channel::unbounded::<Job>();
        let mut workers = self.workers.lock();
        for n in 0..self.size {
            let rx: Receiver<Job> = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, n))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    tracing::error!(pool = %self.name, error = %e, "failed to spawn worker");
                    if workers.is_empty() {
                        return None;
                    }
                    break;
                }
            }
        }
        Some(tx)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting jobs and waits for queued jobs to finish.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.sender.lock().take();
        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.get_mut().take();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}
