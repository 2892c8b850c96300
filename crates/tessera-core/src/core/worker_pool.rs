use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::buffer::{ScratchCache, ScratchKey, ScratchLease};
use crate::core::reclaimer::{ReclaimControl, ReclaimState, Reclaimer};
use crate::telemetry::{self, tags};
use crate::{Result, TesseraError};

type Job = Box<dyn FnOnce(&WorkerContext) + Send + 'static>;

/// What a job sees of the worker running it.
#[derive(Debug)]
pub struct WorkerContext {
    slot: usize,
    cache: ScratchCache,
}

impl WorkerContext {
    /// Index of the worker thread, in `0..worker_count`.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Scratch cache shared by every worker of the pool.
    pub fn cache(&self) -> &ScratchCache {
        &self.cache
    }

    /// Leases this worker's private transient buffer.
    pub fn workspace(&self, min_size: usize) -> Result<ScratchLease> {
        self.cache.checkout(ScratchKey::Worker(self.slot), min_size)
    }
}

/// Fixed-size pool of persistent worker threads sharing one job queue.
///
/// The pool owns the scratch cache its jobs draw from and the idle
/// reclaimer that frees that cache when the pool goes quiet. Dropping the
/// pool drains the queue, joins every worker, and stops the reclaimer.
pub struct WorkerPool {
    worker_count: usize,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    cache: ScratchCache,
    reclaimer: Reclaimer,
}

impl WorkerPool {
    /// Creates a pool with the default reclaimer idle period.
    pub fn new(worker_count: usize) -> Result<Self> {
        Self::with_idle_period(worker_count, crate::config::DEFAULT_IDLE_PERIOD)
    }

    /// Creates a pool whose reclaimer clears scratch buffers after
    /// `idle_period` without activity.
    ///
    /// Zero workers or a zero idle period is a [`TesseraError::Parameter`].
    pub fn with_idle_period(worker_count: usize, idle_period: Duration) -> Result<Self> {
        if worker_count == 0 {
            return Err(TesseraError::Parameter(
                "worker pool needs at least one worker".into(),
            ));
        }
        if idle_period.is_zero() {
            return Err(TesseraError::Parameter(
                "reclaimer idle period must be non-zero".into(),
            ));
        }

        let cache = ScratchCache::new();
        let reclaimer = Reclaimer::spawn(cache.clone(), idle_period)?;
        let (sender, receiver) = unbounded::<Job>();

        let mut pool = Self {
            worker_count,
            sender: Some(sender),
            workers: Vec::with_capacity(worker_count),
            cache,
            reclaimer,
        };

        for slot in 0..worker_count {
            let receiver = receiver.clone();
            let context = WorkerContext {
                slot,
                cache: pool.cache.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("tessera-worker-{slot}"))
                .spawn(move || run_worker(context, receiver))?;
            pool.workers.push(handle);
        }

        tracing::debug!(target: tags::TARGET_POOL, worker_count, "worker pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Scratch cache the pool's jobs draw from.
    pub fn cache(&self) -> &ScratchCache {
        &self.cache
    }

    /// Queues `job` and returns a handle to its result.
    ///
    /// A job that panics resolves its handle to [`TesseraError::JobPanicked`];
    /// the worker thread survives.
    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&WorkerContext) -> Result<T> + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(TesseraError::PoolShutdown)?;
        let (result_tx, result_rx) = bounded(1);

        let wrapped: Job = Box::new(move |context: &WorkerContext| {
            let started_at = Instant::now();
            let outcome = match catch_unwind(AssertUnwindSafe(|| job(context))) {
                Ok(Ok(value)) => {
                    telemetry::increment_counter(tags::METRIC_POOL_JOB_OK_COUNT, 1);
                    Ok(value)
                }
                Ok(Err(error)) => {
                    telemetry::increment_counter(tags::METRIC_POOL_JOB_FAILED_COUNT, 1);
                    tracing::debug!(
                        target: tags::TARGET_POOL,
                        slot = context.slot,
                        %error,
                        "job failed"
                    );
                    Err(error)
                }
                Err(payload) => {
                    telemetry::increment_counter(tags::METRIC_POOL_JOB_PANIC_COUNT, 1);
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(
                        target: tags::TARGET_POOL,
                        slot = context.slot,
                        panic = %message,
                        "job panicked"
                    );
                    Err(TesseraError::JobPanicked(message))
                }
            };
            telemetry::record_histogram(
                tags::METRIC_POOL_JOB_LATENCY_US,
                telemetry::elapsed_us(started_at),
            );
            // The caller may have dropped the handle; the result is discarded then.
            let _ = result_tx.send(outcome);
        });

        sender
            .send(wrapped)
            .map_err(|_| TesseraError::PoolShutdown)?;
        Ok(JobHandle {
            receiver: result_rx,
        })
    }

    /// Holds off the idle reclaimer until the guard is dropped.
    pub fn pause(&self) -> PauseGuard {
        let control = Arc::clone(self.reclaimer.control());
        control.pause();
        PauseGuard { control }
    }

    /// Whether a [`PauseGuard`] is outstanding.
    pub fn is_paused(&self) -> bool {
        self.reclaimer.control().is_paused()
    }

    /// Current state of the idle reclaimer.
    pub fn reclaim_state(&self) -> ReclaimState {
        self.reclaimer.state()
    }

    /// Number of idle sweeps that cleared a non-empty cache.
    pub fn reclaim_sweeps(&self) -> u64 {
        self.reclaimer.sweeps()
    }

    /// Clears the scratch cache immediately. Returns `None` while paused.
    pub fn reclaim_now(&self) -> Option<usize> {
        self.reclaimer.control().sweep_now(&self.cache)
    }

    /// Drains queued jobs and joins every worker, reporting a worker that
    /// died outside a job.
    pub fn shutdown(mut self) -> Result<()> {
        self.join_workers()
    }

    fn join_workers(&mut self) -> Result<()> {
        drop(self.sender.take());

        let mut first_error = None;
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                if first_error.is_none() {
                    first_error = Some(TesseraError::JobPanicked(format!(
                        "worker thread died: {}",
                        panic_message(payload.as_ref())
                    )));
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(error) = self.join_workers() {
            tracing::warn!(target: tags::TARGET_POOL, %error, "worker pool shut down uncleanly");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("running", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

/// Keeps a [`WorkerPool`] paused. Dropping it resumes the pool.
#[must_use = "the pool resumes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PauseGuard {
    control: Arc<ReclaimControl>,
}

impl PauseGuard {
    /// Resumes the pool and wakes the reclaimer so its timer restarts.
    pub fn resume(self) {}
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.control.resume();
    }
}

/// Completion handle for one submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Blocks until the job has run and returns its result.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .map_err(|_| TesseraError::PoolShutdown)?
    }
}

/// Waits for every handle, then returns all results in submission order or
/// the first failure in that order.
///
/// No job is abandoned early: a failure in one job still waits for the rest.
pub fn join_all<T>(handles: impl IntoIterator<Item = JobHandle<T>>) -> Result<Vec<T>> {
    let outcomes: Vec<Result<T>> = handles.into_iter().map(JobHandle::wait).collect();
    outcomes.into_iter().collect()
}

fn run_worker(context: WorkerContext, receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        job(&context);
    }
    tracing::trace!(target: tags::TARGET_POOL, slot = context.slot, "worker exiting");
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
