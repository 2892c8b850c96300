use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::Result;
use crate::buffer::ScratchCache;
use crate::telemetry::{self, tags};

/// Where the idle reclaimer is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimState {
    /// An engine pass holds the pool paused; reclamation is suppressed.
    Active,
    /// Counting down an inactivity period.
    Waiting,
    /// A full quiet period elapsed and the cache is being cleared.
    Idle,
}

#[derive(Debug)]
struct Gate {
    paused: usize,
    toggled: bool,
    shutdown: bool,
    state: ReclaimState,
    sweeps: u64,
}

#[derive(Debug)]
pub(crate) struct ReclaimControl {
    gate: Mutex<Gate>,
    wake: Condvar,
}

impl ReclaimControl {
    fn new() -> Self {
        Self {
            gate: Mutex::new(Gate {
                paused: 0,
                toggled: false,
                shutdown: false,
                state: ReclaimState::Waiting,
                sweeps: 0,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        match self.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Blocks while a sweep is running, then holds reclamation off.
    pub(crate) fn pause(&self) {
        let mut gate = self.lock();
        gate.paused += 1;
        gate.toggled = true;
        gate.state = ReclaimState::Active;
    }

    pub(crate) fn resume(&self) {
        let mut gate = self.lock();
        gate.paused = gate.paused.saturating_sub(1);
        gate.toggled = true;
        if gate.paused == 0 {
            gate.state = ReclaimState::Waiting;
        }
        drop(gate);
        self.wake.notify_all();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.lock().paused > 0
    }

    /// Clears `cache` now unless a pass is in flight.
    pub(crate) fn sweep_now(&self, cache: &ScratchCache) -> Option<usize> {
        let gate = self.lock();
        if gate.paused > 0 {
            return None;
        }
        let freed = cache.clear_all();
        drop(gate);
        Some(freed)
    }

    fn state(&self) -> ReclaimState {
        self.lock().state
    }

    fn sweeps(&self) -> u64 {
        self.lock().sweeps
    }

    fn shutdown(&self) {
        self.lock().shutdown = true;
        self.wake.notify_all();
    }
}

/// Background thread that frees the scratch cache after a quiet period.
///
/// Every `period` the thread wakes up. If the pool was paused or resumed
/// since the last wake-up, or is paused right now, the timer restarts.
/// Otherwise the cache is cleared. The sweep runs with the gate lock held,
/// so a `pause()` issued during a sweep waits for it to finish.
#[derive(Debug)]
pub struct Reclaimer {
    control: Arc<ReclaimControl>,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub fn spawn(cache: ScratchCache, period: Duration) -> Result<Self> {
        let control = Arc::new(ReclaimControl::new());
        let thread_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name("tessera-reclaim".to_owned())
            .spawn(move || run_reclaimer(thread_control, cache, period))?;

        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    pub(crate) fn control(&self) -> &Arc<ReclaimControl> {
        &self.control
    }

    pub fn state(&self) -> ReclaimState {
        self.control.state()
    }

    /// Number of sweeps that actually released memory.
    pub fn sweeps(&self) -> u64 {
        self.control.sweeps()
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.control.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_reclaimer(control: Arc<ReclaimControl>, cache: ScratchCache, period: Duration) {
    lower_priority();

    let mut gate = control.lock();
    loop {
        gate.toggled = false;
        gate = match control
            .wake
            .wait_timeout_while(gate, period, |g| !g.shutdown && !g.toggled)
        {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };

        if gate.shutdown {
            break;
        }
        if gate.toggled || gate.paused > 0 {
            continue;
        }
        if cache.is_empty() {
            continue;
        }

        gate.state = ReclaimState::Idle;
        let freed = cache.clear_all();
        gate.sweeps += 1;
        gate.state = ReclaimState::Waiting;

        telemetry::increment_counter(tags::METRIC_RECLAIM_SWEEP_COUNT, 1);
        telemetry::record_histogram(tags::METRIC_RECLAIM_FREED_BYTES, freed as u64);
        tracing::debug!(
            target: tags::TARGET_RECLAIM,
            freed_bytes = freed,
            "idle pool released scratch buffers"
        );
    }
}

#[cfg(target_os = "linux")]
fn lower_priority() {
    // SAFETY: sched_param is plain old data; zeroed is a valid value for it.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = 0;
    // SAFETY: pthread_self names the calling thread and `param` outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_IDLE, &param) };
    if rc != 0 {
        tracing::debug!(
            target: tags::TARGET_RECLAIM,
            rc,
            "could not demote reclaimer thread to SCHED_IDLE"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn lower_priority() {}
