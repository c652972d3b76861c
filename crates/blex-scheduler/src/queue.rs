//! Background task queue: one worker, strict FIFO, fire-and-forget.
//!
//! Producers never block: `submit` pushes onto an unbounded channel and
//! returns. A single worker task drains the channel and runs jobs one at a
//! time. A job that returns an error or panics is logged and dropped; it
//! never stalls the jobs behind it.
//!
//! There is no backpressure. Under sustained overload the queue grows
//! without bound.
//!
//! Lifecycle is `Stopped → start() → Running → stop() → Stopping → Stopped`.
//! `stop()` closes intake and waits for every job already submitted to
//! finish. While that drain is in progress the queue is `Stopping`: submits
//! fail with `QueueStopped` and `start()` fails with `QueueDraining`, so a
//! second worker never runs next to the draining one.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use blex_core::error::{BlexError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Completion of a worker's drain, awaitable by every concurrent `stop()`.
type Drain = Shared<BoxFuture<'static, ()>>;

/// A deferred unit of work, executed exactly once by the worker.
enum Job {
    /// Synchronous work; runs on the blocking pool.
    Blocking(Box<dyn FnOnce() -> anyhow::Result<()> + Send>),
    /// Asynchronous work; awaited on the worker task.
    Async(Box<dyn FnOnce() -> JobFuture + Send>),
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum QueueState {
    Stopped,
    Running,
    /// Intake is closed and the worker is finishing submitted jobs.
    Stopping,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Stopped => write!(f, "stopped"),
            QueueState::Running => write!(f, "running"),
            QueueState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub state: QueueState,
    pub pending: usize,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    pending: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
}

struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

/// What the queue currently owns. The old worker's handle stays here until
/// its drain has completed.
enum Slot {
    Idle,
    Running(Worker),
    Draining(Drain),
}

impl Slot {
    fn state(&self) -> QueueState {
        match self {
            Slot::Idle => QueueState::Stopped,
            Slot::Running(_) => QueueState::Running,
            Slot::Draining(drain) if drain.peek().is_none() => QueueState::Stopping,
            Slot::Draining(_) => QueueState::Stopped,
        }
    }
}

/// Single-worker background task queue.
pub struct TaskQueue {
    slot: Mutex<Slot>,
    counters: Arc<Counters>,
}

impl TaskQueue {
    /// Create a stopped queue.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create a queue and start its worker on the current tokio runtime.
    pub fn started() -> Result<Self> {
        let queue = Self::new();
        queue.start()?;
        Ok(queue)
    }

    /// Spawn the worker. Calling this on a running queue does nothing.
    ///
    /// Fails with `QueueDraining` while a `stop()` is still finishing the
    /// previous worker's jobs; await that `stop()` before restarting.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BlexError::Runtime(format!("TaskQueue needs a tokio runtime: {e}")))?;

        let mut slot = self.lock_slot()?;
        match slot.state() {
            QueueState::Running => return Ok(()),
            QueueState::Stopping => return Err(BlexError::QueueDraining),
            QueueState::Stopped => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = runtime.spawn(run_worker(rx, Arc::clone(&self.counters)));
        *slot = Slot::Running(Worker { tx, handle });
        tracing::info!("Task queue worker started");
        Ok(())
    }

    /// Close intake, run every job already submitted, then stop the worker.
    ///
    /// Concurrent callers all wait for the same drain.
    pub async fn stop(&self) {
        let drain = match self.lock_slot() {
            Ok(mut slot) => match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Idle => return,
                Slot::Running(Worker { tx, handle }) => {
                    // Dropping the last sender lets the worker drain and exit.
                    drop(tx);
                    let drain = async move {
                        if let Err(e) = handle.await {
                            tracing::error!("Task queue worker ended abnormally: {e}");
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Slot::Draining(drain.clone());
                    drain
                }
                Slot::Draining(drain) => {
                    *slot = Slot::Draining(drain.clone());
                    drain
                }
            },
            Err(e) => {
                tracing::error!("Task queue stop: {e}");
                return;
            }
        };

        drain.clone().await;

        if let Ok(mut slot) = self.lock_slot() {
            if matches!(&*slot, Slot::Draining(current) if current.ptr_eq(&drain)) {
                *slot = Slot::Idle;
                tracing::info!("Task queue worker stopped");
            }
        }
    }

    /// Queue a synchronous job.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(Job::Blocking(Box::new(job)))
    }

    /// Queue an asynchronous job.
    pub fn submit_async<F, Fut>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push(Job::Async(Box::new(move || Box::pin(job()) as JobFuture)))
    }

    fn push(&self, job: Job) -> Result<()> {
        let slot = self.lock_slot()?;
        let Slot::Running(worker) = &*slot else {
            return Err(BlexError::QueueStopped);
        };

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        if worker.tx.send(job).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BlexError::QueueStopped);
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        match self.slot.lock() {
            Ok(slot) => slot.state(),
            Err(_) => QueueState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == QueueState::Running
    }

    /// Jobs submitted but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            state: self.state(),
            pending: self.pending(),
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    fn lock_slot(&self) -> Result<std::sync::MutexGuard<'_, Slot>> {
        self.slot
            .lock()
            .map_err(|e| BlexError::Runtime(format!("Task queue lock poisoned: {e}")))
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker loop: pull, run, record. Ends once every sender is gone and the
/// channel is empty.
async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, counters: Arc<Counters>) {
    let mut seq: u64 = 0;
    while let Some(job) = rx.recv().await {
        counters.pending.fetch_sub(1, Ordering::SeqCst);
        seq += 1;

        match run_job(job).await {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(job = seq, "Background job finished");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(job = seq, "Background job failed: {e:?}");
            }
        }
    }
}

async fn run_job(job: Job) -> anyhow::Result<()> {
    match job {
        Job::Blocking(f) => match tokio::task::spawn_blocking(f).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                Err(anyhow::anyhow!("job panicked: {}", panic_message(e.into_panic())))
            }
            Err(e) => Err(anyhow::anyhow!("job cancelled: {e}")),
        },
        Job::Async(make) => match AssertUnwindSafe(async move { make().await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!("job panicked: {}", panic_message(payload))),
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
