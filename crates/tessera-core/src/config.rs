use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, TesseraError};

/// Environment variable holding the worker pool size.
pub const THREADS_ENV: &str = "HDF5_FILTER_THREADS";
/// Upper bound on the pool size picked when no size is configured.
pub const MAX_DEFAULT_WORKERS: usize = 8;
/// Sub-blocks a block is split into when it has enough rows.
pub const DEFAULT_TARGET_SUBCHUNKS: u32 = 24;
/// Extra bytes provisioned past the raw sub-block size for encoded output.
pub const DEFAULT_ENCODE_SLACK: usize = 8192;
/// Quiet period after which cached scratch buffers are released.
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_millis(100);

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size. `None` picks `min(available cores, 8)`.
    pub workers: Option<usize>,
    /// Sub-blocks a block is split into, fewer when it has fewer rows.
    pub target_subchunks: u32,
    /// Bytes of encoder output space past the raw sub-block size.
    pub encode_slack: usize,
    /// Quiet time before the reclaimer frees scratch buffers.
    pub idle_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            target_subchunks: DEFAULT_TARGET_SUBCHUNKS,
            encode_slack: DEFAULT_ENCODE_SLACK,
            idle_period: DEFAULT_IDLE_PERIOD,
        }
    }
}

impl EngineConfig {
    /// Defaults, with the pool size taken from [`THREADS_ENV`].
    pub fn from_env() -> Self {
        Self {
            workers: worker_setting_from_env(),
            ..Self::default()
        }
    }

    /// Fixes the pool size. Zero picks the default size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the sub-block count blocks are split into.
    pub fn with_target_subchunks(mut self, target_subchunks: u32) -> Self {
        self.target_subchunks = target_subchunks;
        self
    }

    /// Sets how long the pool must be quiet before scratch is freed.
    pub fn with_idle_period(mut self, idle_period: Duration) -> Self {
        self.idle_period = idle_period;
        self
    }

    /// Rejects a zero sub-block target or a zero idle period.
    pub fn validate(&self) -> Result<()> {
        if self.target_subchunks == 0 {
            return Err(TesseraError::Parameter(
                "target sub-chunk count must be positive".into(),
            ));
        }
        if self.idle_period.is_zero() {
            return Err(TesseraError::Parameter(
                "idle period must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Pool size this configuration asks for.
    pub fn resolved_workers(&self) -> usize {
        resolve_workers(self.workers)
    }
}

/// Turns an optional worker setting into a concrete pool size.
pub fn resolve_workers(setting: Option<usize>) -> usize {
    match setting {
        Some(workers) if workers > 0 => workers,
        _ => default_workers(),
    }
}

/// `min(available cores, 8)`, and at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

/// Parses a worker setting with C `atoi` leniency.
///
/// Leading whitespace and a sign are accepted and parsing stops at the first
/// non-digit. Anything that does not yield a positive count means "unset".
pub fn parse_worker_setting(raw: &str) -> Option<usize> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    let value: usize = digits[..end].parse().ok()?;
    if negative || value == 0 {
        None
    } else {
        Some(value)
    }
}

/// Current worker setting from the environment.
pub fn worker_setting_from_env() -> Option<usize> {
    std::env::var(THREADS_ENV)
        .ok()
        .as_deref()
        .and_then(parse_worker_setting)
}
