//! Process-wide counters, gauges and histograms.
//!
//! Everything here compiles to no-ops unless the `telemetry` feature is
//! enabled, so call sites never need their own `cfg` guards.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub mod tags;

/// Summary of one histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }
}

/// Point-in-time copy of every recorded metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.get(name).copied()
    }
}

/// Microseconds since `started_at`, clamped to `u64::MAX`.
#[inline]
pub fn elapsed_us(started_at: Instant) -> u64 {
    started_at.elapsed().as_micros().min(u64::MAX as u128) as u64
}

#[inline]
pub fn increment_counter(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::increment_counter(name, value);

    let _ = (name, value);
}

#[inline]
pub fn set_gauge(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::set_gauge(name, value);

    let _ = (name, value);
}

#[inline]
pub fn record_histogram(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::record_histogram(name, value);

    let _ = (name, value);
}

pub fn snapshot() -> TelemetrySnapshot {
    #[cfg(feature = "telemetry")]
    {
        registry::snapshot()
    }

    #[cfg(not(feature = "telemetry"))]
    {
        TelemetrySnapshot::default()
    }
}

pub fn reset() {
    #[cfg(feature = "telemetry")]
    registry::reset();
}

#[cfg(feature = "telemetry")]
mod registry {
    use std::collections::BTreeMap;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use super::{HistogramSnapshot, TelemetrySnapshot};

    #[derive(Default)]
    struct Registry {
        counters: BTreeMap<&'static str, u64>,
        gauges: BTreeMap<&'static str, u64>,
        histograms: BTreeMap<&'static str, HistogramSnapshot>,
    }

    fn registry() -> MutexGuard<'static, Registry> {
        static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
        let mutex = REGISTRY.get_or_init(|| Mutex::new(Registry::default()));
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(super) fn increment_counter(name: &'static str, value: u64) {
        let mut registry = registry();
        let counter = registry.counters.entry(name).or_insert(0);
        *counter = counter.saturating_add(value);
    }

    pub(super) fn set_gauge(name: &'static str, value: u64) {
        registry().gauges.insert(name, value);
    }

    pub(super) fn record_histogram(name: &'static str, value: u64) {
        let mut registry = registry();
        let hist = registry.histograms.entry(name).or_default();
        if hist.count == 0 {
            hist.min = value;
            hist.max = value;
        } else {
            hist.min = hist.min.min(value);
            hist.max = hist.max.max(value);
        }
        hist.count = hist.count.saturating_add(1);
        hist.total = hist.total.saturating_add(value);
    }

    pub(super) fn snapshot() -> TelemetrySnapshot {
        let registry = registry();
        TelemetrySnapshot {
            counters: registry
                .counters
                .iter()
                .map(|(name, value)| ((*name).to_owned(), *value))
                .collect(),
            gauges: registry
                .gauges
                .iter()
                .map(|(name, value)| ((*name).to_owned(), *value))
                .collect(),
            histograms: registry
                .histograms
                .iter()
                .map(|(name, value)| ((*name).to_owned(), *value))
                .collect(),
        }
    }

    pub(super) fn reset() {
        let mut registry = registry();
        registry.counters.clear();
        registry.gauges.clear();
        registry.histograms.clear();
    }
}
