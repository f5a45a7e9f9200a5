//! Background job runner for work that must stay off the tick thread.
//!
//! A [`WorkerPool`] is a FIFO queue with any number of producers and exactly
//! one consumer thread. The thread is spawned on first submission, polls the
//! queue every `poll_interval`, and exits on its own after `idle_timeout`
//! without work. The next submission starts a new one.
//!
//! Jobs from one pool run one at a time in submission order, including across
//! worker restarts. There is no ordering between pools and no cancellation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("pool '{pool}' could not accept the job")]
    QueueSubmitFailed { pool: String },
    #[error("pool '{pool}' is shut down")]
    Closed { pool: String },
    #[error("pool '{pool}' could not start a worker thread: {source}")]
    SpawnFailed {
        pool: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "jobs".into(),
            poll_interval: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    /// Reserved shutdown sentinel. Sent once, by `shutdown`.
    Shutdown,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub spawns: u64,
    /// Workers that exited because they sat idle for `idle_timeout`.
    pub idle_exits: u64,
}

struct Inner {
    config: PoolConfig,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    /// True while a worker is (or is about to be) consuming. Whoever flips it
    /// from false to true owns the consumer role.
    alive: AtomicBool,
    closed: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    spawns: AtomicU64,
    idle_exits: AtomicU64,
}

/// Single-consumer FIFO job queue with a lazily started worker thread.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                config,
                tx,
                rx,
                alive: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                handle: Mutex::new(None),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                spawns: AtomicU64::new(0),
                idle_exits: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Queue `callback(payload)` to run on the worker thread.
    ///
    /// The callback must not block indefinitely, and must drop any
    /// [`InUseGuard`](crate::level::InUseGuard) it was given before returning.
    pub fn submit<T, F>(&self, payload: T, callback: F) -> Result<(), JobError>
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.execute(move || callback(payload))
    }

    /// Queue a closure to run on the worker thread.
    pub fn execute<F>(&self, job: F) -> Result<(), JobError>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(JobError::Closed {
                pool: inner.config.name.clone(),
            });
        }
        inner
            .tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| JobError::QueueSubmitFailed {
                pool: inner.config.name.clone(),
            })?;
        inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.ensure_worker()
    }

    /// Whether a worker thread currently owns the queue.
    pub fn is_running(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Jobs queued but not yet started.
    pub fn pending(&self) -> usize {
        self.inner.rx.len()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            submitted: inner.submitted.load(Ordering::Relaxed),
            completed: inner.completed.load(Ordering::Relaxed),
            panicked: inner.panicked.load(Ordering::Relaxed),
            spawns: inner.spawns.load(Ordering::Relaxed),
            idle_exits: inner.idle_exits.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs, let everything already queued run, then stop the
    /// worker and wait for it. Calling it again is a no-op.
    ///
    /// Must not be called from a job running on this same pool.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if inner.tx.send(Message::Shutdown).is_err() {
            return;
        }
        if let Err(e) = self.ensure_worker() {
            tracing::error!("Pool '{}': {}", inner.config.name, e);
            return;
        }
        let handle = inner.handle.lock().expect("pool handle poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Pool '{}': worker thread panicked", inner.config.name);
            }
        }
        tracing::debug!("Pool '{}' shut down", inner.config.name);
    }

    fn ensure_worker(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        if inner
            .alive
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("pool-{}", inner.config.name))
            .spawn(move || worker_loop(worker));
        match spawned {
            Ok(handle) => {
                inner.spawns.fetch_add(1, Ordering::Relaxed);
                *inner.handle.lock().expect("pool handle poisoned") = Some(handle);
                tracing::debug!("Pool '{}': worker started", inner.config.name);
                Ok(())
            }
            Err(source) => {
                inner.alive.store(false, Ordering::SeqCst);
                Err(JobError::SpawnFailed {
                    pool: inner.config.name.clone(),
                    source,
                })
            }
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    let name = inner.config.name.as_str();
    let mut last_job = Instant::now();
    loop {
        match inner.rx.recv_timeout(inner.config.poll_interval) {
            Ok(Message::Run(job)) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    inner.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Pool '{}': job panicked", name);
                }
                inner.completed.fetch_add(1, Ordering::Relaxed);
                last_job = Instant::now();
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                inner.alive.store(false, Ordering::SeqCst);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_job.elapsed() < inner.config.idle_timeout {
                    continue;
                }
                // Give up the consumer role, then take it back if a job
                // slipped in before a submitter noticed we were gone.
                inner.alive.store(false, Ordering::SeqCst);
                if !inner.rx.is_empty()
                    && inner
                        .alive
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    last_job = Instant::now();
                    continue;
                }
                inner.idle_exits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Pool '{}': worker idle for {:?}, exiting", name, inner.config.idle_timeout);
                return;
            }
        }
    }
}
