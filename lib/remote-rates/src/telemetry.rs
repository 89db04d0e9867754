//! Internal telemetry.

use metrics::{counter, gauge, Counter, Gauge};

/// Handles to the engine's internal metrics.
///
/// Handles are registered once, when the engine is built, against whatever `metrics` recorder is installed at that
/// point. Without a recorder, they are no-ops.
#[derive(Clone)]
pub(crate) struct Telemetry {
    updates_applied: Counter,
    updates_rejected: Counter,
    entries_dropped: Counter,
    duplicate_targets: Counter,
    samplers_created: Counter,
    samplers_evicted: Counter,
    active_samplers: Gauge,
    catalog_version: Gauge,
}

impl Telemetry {
    pub(crate) fn new() -> Self {
        Self {
            updates_applied: counter!("remote_rates.updates_applied"),
            updates_rejected: counter!("remote_rates.updates_rejected"),
            entries_dropped: counter!("remote_rates.entries_dropped"),
            duplicate_targets: counter!("remote_rates.duplicate_targets"),
            samplers_created: counter!("remote_rates.samplers_created"),
            samplers_evicted: counter!("remote_rates.samplers_evicted"),
            active_samplers: gauge!("remote_rates.active_samplers"),
            catalog_version: gauge!("remote_rates.catalog_version"),
        }
    }

    pub(crate) fn update_applied(&self, version: u64, dropped: usize, duplicates: usize, evicted: usize) {
        self.updates_applied.increment(1);
        self.entries_dropped.increment(dropped as u64);
        self.duplicate_targets.increment(duplicates as u64);
        self.samplers_evicted.increment(evicted as u64);
        self.catalog_version.set(version as f64);
    }

    pub(crate) fn update_rejected(&self) {
        self.updates_rejected.increment(1);
    }

    pub(crate) fn sampler_created(&self) {
        self.samplers_created.increment(1);
    }

    pub(crate) fn set_active_samplers(&self, count: usize) {
        self.active_samplers.set(count as f64);
    }
}
