//! Per-signature remote samplers.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::Rng as _;

use crate::catalog::TargetDescriptor;
use crate::estimator::RateEstimator;
use crate::signature::Signature;

/// Root span metric holding the remote target TPS applied to the trace.
pub const TAG_REMOTE_TPS: &str = "_dd.remote.tps";

/// Root span metric holding the version of the remote rates catalog applied to the trace.
pub const TAG_REMOTE_VERSION: &str = "_dd.remote.version";

// Floor for the estimated rate, keeping the keep probability finite before any traffic has been counted.
const MIN_ESTIMATED_TPS: f64 = 1e-9;

/// A destination for numeric diagnostics, typically the metrics of a trace's root span.
pub trait MetricsSink {
    /// Sets `key` to `value`, leaving every other key untouched.
    fn set_metric(&mut self, key: &str, value: f64);
}

impl<S: BuildHasher> MetricsSink for HashMap<String, f64, S> {
    fn set_metric(&mut self, key: &str, value: f64) {
        self.insert(key.to_string(), value);
    }
}

impl MetricsSink for BTreeMap<String, f64> {
    fn set_metric(&mut self, key: &str, value: f64) {
        self.insert(key.to_string(), value);
    }
}

/// Adaptive sampler enforcing a remote target on one signature.
///
/// The target can be replaced at any time while other threads are deciding or tagging: readers always see either the
/// complete previous descriptor or the complete new one.
#[derive(Debug)]
pub struct RemoteSampler {
    signature: Signature,
    target: ArcSwap<TargetDescriptor>,
    estimator: RateEstimator,
}

impl RemoteSampler {
    /// Creates a new `RemoteSampler`.
    pub fn new(signature: Signature, target: TargetDescriptor, estimator: RateEstimator) -> Self {
        Self {
            signature,
            target: ArcSwap::from_pointee(target),
            estimator,
        }
    }

    /// Returns the signature this sampler applies to.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Returns the current target.
    pub fn target(&self) -> TargetDescriptor {
        **self.target.load()
    }

    /// Replaces the current target.
    pub fn set_target(&self, target: TargetDescriptor) {
        self.target.store(Arc::new(target));
    }

    /// Records one occurrence of the signature.
    pub fn observe(&self) {
        self.estimator.observe();
    }

    /// Returns the estimated arrival rate of the signature, in traces per second.
    pub fn estimated_tps(&self) -> f64 {
        self.estimator.estimated_tps()
    }

    /// Returns the probability with which a trace is currently kept.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate_for(&self.target())
    }

    /// Returns the probability with which a trace is kept under `target`.
    pub fn sample_rate_for(&self, target: &TargetDescriptor) -> f64 {
        (target.target_tps() / self.estimated_tps().max(MIN_ESTIMATED_TPS)).clamp(0.0, 1.0)
    }

    /// Decides whether to keep a trace, drawing from the thread-local random number generator.
    pub fn decide(&self) -> bool {
        self.decide_for(&self.target())
    }

    /// Decides whether to keep a trace under `target`, a snapshot of this sampler's target taken by the caller.
    pub fn decide_for(&self, target: &TargetDescriptor) -> bool {
        rand::rng().random::<f64>() < self.sample_rate_for(target)
    }

    /// Decides whether to keep a trace given a uniform draw in `[0, 1)`.
    pub fn decide_with_draw(&self, draw: f64) -> bool {
        draw < self.sample_rate()
    }

    /// Writes the active target TPS and catalog version into `sink`.
    pub fn tag<M>(&self, sink: &mut M, version: u64)
    where
        M: MetricsSink + ?Sized,
    {
        write_tags(sink, &self.target(), version);
    }
}

/// Writes the target TPS of `target` and the catalog `version` into `sink`.
pub fn write_tags<M>(sink: &mut M, target: &TargetDescriptor, version: u64)
where
    M: MetricsSink + ?Sized,
{
    sink.set_metric(TAG_REMOTE_TPS, target.target_tps());
    sink.set_metric(TAG_REMOTE_VERSION, version as f64);
}
