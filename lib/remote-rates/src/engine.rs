//! Remote rates engine.
//!
//! The engine owns the current [`TargetCatalog`] and the registry of [`RemoteSampler`]s. Updates replace the catalog
//! wholesale; samplers are only created once traffic for a targeted signature is actually observed, and are evicted as
//! soon as a later catalog stops targeting their signature.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use hashbrown::hash_map::Entry;
use quanta::Clock;
use snafu::OptionExt as _;
use tracing::{debug, info, warn};

use crate::catalog::{TargetCatalog, TargetDescriptor};
use crate::collections::FastHashMap;
use crate::config::RemoteRatesConfiguration;
use crate::delivery::UpdateHandler;
use crate::errors::{Stopped, UpdateError};
use crate::estimator::RateEstimator;
use crate::sampler::{write_tags, MetricsSink, RemoteSampler};
use crate::signature::Signature;
use crate::telemetry::Telemetry;
use crate::update::RatesUpdate;

/// Outcome of applying an update.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpdateSummary {
    /// Version of the applied catalog.
    pub version: u64,

    /// Number of signatures targeted by the new catalog.
    pub targets: usize,

    /// Number of entries dropped, either as malformed or as invalid.
    pub dropped: usize,

    /// Number of entries that competed with an earlier entry for the same signature.
    pub duplicates: usize,

    /// Number of existing samplers whose target was replaced in place.
    pub retained: usize,

    /// Number of existing samplers evicted because their signature is no longer targeted.
    pub evicted: usize,
}

#[derive(Default)]
struct State {
    catalog: Arc<TargetCatalog>,
    samplers: FastHashMap<Signature, Arc<RemoteSampler>>,
    stopped: bool,
}

/// Applies remotely configured target rates to locally observed traffic.
///
/// The engine is shared between any number of ingestion workers and a single configuration deliverer. A single lock
/// guards both the catalog and the sampler registry, and is never held while estimating rates or drawing random
/// numbers.
pub struct RemoteRatesEngine {
    state: RwLock<State>,
    max_tps: f64,
    decay_period: Duration,
    clock: Clock,
    telemetry: Telemetry,
}

impl RemoteRatesEngine {
    /// Creates a new `RemoteRatesEngine` from the given configuration.
    ///
    /// Returns `None` if the `remote_rates` feature is not enabled, or if the configured ceiling is not positive.
    pub fn from_configuration(config: &RemoteRatesConfiguration) -> Option<Self> {
        Self::with_clock(config, Clock::new())
    }

    /// Creates a new `RemoteRatesEngine` reading time from the given clock.
    ///
    /// Returns `None` under the same conditions as [`from_configuration`][Self::from_configuration].
    pub fn with_clock(config: &RemoteRatesConfiguration, clock: Clock) -> Option<Self> {
        if !config.feature_enabled() {
            debug!("Remote rates feature not enabled. Engine disabled.");
            return None;
        }

        let max_tps = config.max_remote_traces_per_second();
        if max_tps.is_nan() || max_tps <= 0.0 {
            debug!(max_tps, "Remote rates ceiling is not positive. Engine disabled.");
            return None;
        }

        Some(Self {
            state: RwLock::new(State::default()),
            max_tps,
            decay_period: config.decay_period(),
            clock,
            telemetry: Telemetry::new(),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies an update, replacing the current catalog.
    ///
    /// Samplers whose signature is still targeted get their new target in place; the others are evicted. No sampler is
    /// created here. Returns `None` if the engine has been stopped.
    pub fn apply_update(&self, update: &RatesUpdate) -> Option<UpdateSummary> {
        let build = TargetCatalog::build(update.version(), update.targets(), self.max_tps);
        let catalog = Arc::new(build.catalog);

        let mut state = self.write_state();
        if state.stopped {
            debug!(version = update.version(), "Ignoring remote rates update. Engine is stopped.");
            return None;
        }

        let previous_version = state.catalog.version();
        if update.version() < previous_version {
            debug!(
                version = update.version(),
                previous_version, "Applying remote rates update older than the current catalog."
            );
        }

        let before = state.samplers.len();
        let mut retained = 0;
        state.samplers.retain(|signature, sampler| match catalog.get(signature) {
            Some(target) => {
                sampler.set_target(*target);
                retained += 1;
                true
            }
            None => false,
        });
        let active = state.samplers.len();
        let targets = catalog.len();
        state.catalog = catalog;
        drop(state);

        let summary = UpdateSummary {
            version: update.version(),
            targets,
            dropped: build.dropped + update.malformed(),
            duplicates: build.duplicates,
            retained,
            evicted: before - active,
        };

        self.telemetry
            .update_applied(summary.version, summary.dropped, summary.duplicates, summary.evicted);
        self.telemetry.set_active_samplers(active);

        info!(
            version = summary.version,
            targets = summary.targets,
            dropped = summary.dropped,
            duplicates = summary.duplicates,
            retained = summary.retained,
            evicted = summary.evicted,
            "Applied remote rates update."
        );

        Some(summary)
    }

    /// Parses a JSON payload and applies it at the given version.
    ///
    /// Individually malformed entries are dropped.
    ///
    /// # Errors
    ///
    /// If the payload cannot be parsed as a whole, an error is returned and the current catalog stays in effect. If
    /// the engine has been stopped, an error is returned.
    pub fn apply_payload(&self, version: u64, payload: &[u8]) -> Result<UpdateSummary, UpdateError> {
        if self.is_stopped() {
            return Stopped.fail();
        }

        let update = match RatesUpdate::from_json(version, payload) {
            Ok(update) => update,
            Err(e) => {
                self.reject(&e);
                return Err(e);
            }
        };

        self.apply_update(&update).context(Stopped)
    }

    fn reject(&self, error: &UpdateError) {
        warn!(error = %error, "Rejected remote rates payload. Keeping current catalog.");
        self.telemetry.update_rejected();
    }

    /// Records one trace for the given signature.
    ///
    /// Does nothing unless the current catalog targets the signature. The sampler is created on the first observation.
    pub fn observe_signature(&self, signature: Signature) {
        if let Some(sampler) = self.sampler_for_observation(signature) {
            sampler.observe();
        }
    }

    fn sampler_for_observation(&self, signature: Signature) -> Option<Arc<RemoteSampler>> {
        {
            let state = self.read_state();
            if state.stopped {
                return None;
            }
            if let Some(sampler) = state.samplers.get(&signature) {
                return Some(Arc::clone(sampler));
            }
            if !state.catalog.contains(&signature) {
                return None;
            }
        }

        // The catalog may have been replaced, or another thread may have created the sampler, since the read lock was
        // released.
        let mut state = self.write_state();
        if state.stopped {
            return None;
        }
        let target = *state.catalog.get(&signature)?;

        let (sampler, created) = match state.samplers.entry(signature) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let estimator = RateEstimator::new(self.clock.clone(), self.decay_period);
                let sampler = Arc::new(RemoteSampler::new(signature, target, estimator));
                entry.insert(Arc::clone(&sampler));
                (sampler, true)
            }
        };
        let active = state.samplers.len();
        drop(state);

        if created {
            debug!(%signature, target_tps = target.target_tps(), "Created remote sampler.");
            self.telemetry.sampler_created();
            self.telemetry.set_active_samplers(active);
        }

        Some(sampler)
    }

    // The target and the version are read under the same lock that `apply_update` holds while swapping targets, so
    // they always come from the same catalog.
    fn snapshot(&self, signature: Signature) -> Option<(Arc<RemoteSampler>, TargetDescriptor, u64)> {
        let state = self.read_state();
        state
            .samplers
            .get(&signature)
            .map(|sampler| (Arc::clone(sampler), sampler.target(), state.catalog.version()))
    }

    /// Votes on whether to keep a trace with the given signature, tagging `sink` with the applied target.
    ///
    /// Without a sampler for the signature, the engine has no opinion: `true` is returned and `sink` is left untouched.
    /// Otherwise, the target TPS and catalog version are always written, whatever the vote. The vote and the tags use
    /// the same target, taken from the catalog reported in the tags.
    pub fn decide_and_tag<M>(&self, signature: Signature, sink: &mut M) -> bool
    where
        M: MetricsSink + ?Sized,
    {
        let Some((sampler, target, version)) = self.snapshot(signature) else {
            return true;
        };

        let keep = sampler.decide_for(&target);
        write_tags(sink, &target, version);
        keep
    }

    /// Returns the current keep probability for the given signature, if it has a sampler.
    pub fn sample_rate(&self, signature: Signature) -> Option<f64> {
        self.snapshot(signature)
            .map(|(sampler, target, _)| sampler.sample_rate_for(&target))
    }

    /// Returns the current keep probability of every sampler, ordered by signature.
    pub fn sample_rates(&self) -> Vec<(Signature, f64)> {
        let samplers = self.read_state().samplers.values().cloned().collect::<Vec<_>>();
        let mut rates = samplers
            .into_iter()
            .map(|sampler| (sampler.signature(), sampler.sample_rate()))
            .collect::<Vec<_>>();
        rates.sort_unstable_by_key(|(signature, _)| *signature);
        rates
    }

    /// Returns the version of the current catalog.
    pub fn version(&self) -> u64 {
        self.read_state().catalog.version()
    }

    /// Returns the number of active samplers.
    pub fn sampler_count(&self) -> usize {
        self.read_state().samplers.len()
    }

    /// Returns the target the current catalog assigns to the given signature.
    pub fn target_for(&self, signature: Signature) -> Option<TargetDescriptor> {
        self.read_state().catalog.get(&signature).copied()
    }

    /// Returns the configured ceiling, in traces per second.
    pub fn max_tps(&self) -> f64 {
        self.max_tps
    }

    /// Returns `true` if the engine has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.read_state().stopped
    }

    /// Stops the engine.
    ///
    /// Every sampler and target is dropped, and all further operations are no-ops. Calling this more than once has no
    /// additional effect.
    pub fn stop(&self) {
        let mut state = self.write_state();
        if state.stopped {
            return;
        }

        let version = state.catalog.version();
        let evicted = state.samplers.len();
        state.stopped = true;
        state.samplers.clear();
        state.catalog = Arc::new(TargetCatalog::empty(version));
        drop(state);

        self.telemetry.set_active_samplers(0);
        info!(version, evicted, "Stopped remote rates engine.");
    }
}

impl UpdateHandler for RemoteRatesEngine {
    fn on_update(&self, update: RatesUpdate) {
        self.apply_update(&update);
    }

    fn on_rejected(&self, error: &UpdateError) {
        self.reject(error);
    }
}

/// Remote rates operations on an optional engine.
///
/// A missing engine behaves exactly like an engine with no sampler for the signature, so call sites don't need to
/// special-case the disabled state.
pub trait RemoteVote {
    /// Records one trace for the given signature.
    fn observe_signature(&self, signature: Signature);

    /// Votes on whether to keep a trace, tagging `sink` if a sampler applies.
    fn decide_and_tag<M>(&self, signature: Signature, sink: &mut M) -> bool
    where
        M: MetricsSink + ?Sized;
}

impl RemoteVote for Option<&RemoteRatesEngine> {
    fn observe_signature(&self, signature: Signature) {
        if let Some(engine) = self {
            engine.observe_signature(signature);
        }
    }

    fn decide_and_tag<M>(&self, signature: Signature, sink: &mut M) -> bool
    where
        M: MetricsSink + ?Sized,
    {
        match self {
            Some(engine) => engine.decide_and_tag(signature, sink),
            None => true,
        }
    }
}

impl RemoteVote for Option<Arc<RemoteRatesEngine>> {
    fn observe_signature(&self, signature: Signature) {
        self.as_deref().observe_signature(signature);
    }

    fn decide_and_tag<M>(&self, signature: Signature, sink: &mut M) -> bool
    where
        M: MetricsSink + ?Sized,
    {
        self.as_deref().decide_and_tag(signature, sink)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::thread;

    use quanta::Mock;

    use super::*;
    use crate::sampler::{TAG_REMOTE_TPS, TAG_REMOTE_VERSION};
    use crate::signature::hash;
    use crate::update::RawTarget;

    const MAX_REMOTE_TPS: f64 = 12377.0;

    fn test_engine() -> (RemoteRatesEngine, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        let config = RemoteRatesConfiguration::enabled_with_ceiling(MAX_REMOTE_TPS);
        let engine = RemoteRatesEngine::with_clock(&config, clock).expect("engine should be enabled");
        (engine, mock)
    }

    struct ExpectedSampler {
        service: &'static str,
        env: &'static str,
        target_tps: f64,
        mechanism: u32,
        rank: u32,
    }

    const fn expected(service: &'static str, env: &'static str, target_tps: f64) -> ExpectedSampler {
        ExpectedSampler {
            service,
            env,
            target_tps,
            mechanism: 0,
            rank: 0,
        }
    }

    struct Step {
        name: &'static str,
        update: Option<RatesUpdate>,
        observe: Vec<(&'static str, &'static str)>,
        expected: Vec<ExpectedSampler>,
        version: u64,
    }

    #[test]
    fn update_sequence() {
        let steps = vec![
            Step {
                name: "first rates received",
                update: Some(RatesUpdate::new(
                    30,
                    vec![
                        RawTarget::new("willBeRemoved", "", 3.2),
                        RawTarget::new("willBeRemoved", "env2", 33.0),
                        RawTarget::new("keep", "", 1.0),
                    ],
                )),
                observe: vec![],
                expected: vec![],
                version: 30,
            },
            Step {
                name: "sampler created after observing a targeted signature",
                update: None,
                observe: vec![("willBeRemoved", "")],
                expected: vec![expected("willBeRemoved", "", 3.2)],
                version: 30,
            },
            Step {
                name: "untargeted signature is ignored",
                update: None,
                observe: vec![("no remote tps", "")],
                expected: vec![expected("willBeRemoved", "", 3.2)],
                version: 30,
            },
            Step {
                name: "two more samplers",
                update: None,
                observe: vec![("keep", ""), ("willBeRemoved", "env2")],
                expected: vec![
                    expected("willBeRemoved", "", 3.2),
                    expected("willBeRemoved", "env2", 33.0),
                    expected("keep", "", 1.0),
                ],
                version: 30,
            },
            Step {
                name: "untargeted samplers are evicted",
                update: Some(RatesUpdate::new(35, vec![RawTarget::new("keep", "", 27.0)])),
                observe: vec![],
                expected: vec![expected("keep", "", 27.0)],
                version: 35,
            },
            Step {
                name: "targets are clamped to the ceiling",
                update: Some(RatesUpdate::new(
                    35,
                    vec![RawTarget::new("keep", "", 3718271.0), RawTarget::new("noop", "", 0.0)],
                )),
                observe: vec![],
                expected: vec![expected("keep", "", MAX_REMOTE_TPS)],
                version: 35,
            },
            Step {
                name: "highest rank wins",
                update: Some(RatesUpdate::new(
                    0,
                    vec![
                        RawTarget::new("keep", "", 10.0).with_mechanism(5).with_rank(3),
                        RawTarget::new("keep", "", 10.0).with_mechanism(10).with_rank(10),
                        RawTarget::new("keep", "", 10.0).with_mechanism(6).with_rank(6),
                    ],
                )),
                observe: vec![("keep", "")],
                expected: vec![ExpectedSampler {
                    mechanism: 10,
                    rank: 10,
                    ..expected("keep", "", 10.0)
                }],
                version: 0,
            },
            Step {
                name: "duplicate ranks",
                update: Some(RatesUpdate::new(
                    0,
                    vec![
                        RawTarget::new("keep", "", 10.0).with_rank(3),
                        RawTarget::new("keep", "", 10.0).with_rank(3),
                    ],
                )),
                observe: vec![],
                expected: vec![ExpectedSampler {
                    rank: 3,
                    ..expected("keep", "", 10.0)
                }],
                version: 0,
            },
        ];

        let (engine, _mock) = test_engine();
        for step in steps {
            if let Some(update) = &step.update {
                assert!(engine.apply_update(update).is_some(), "{}", step.name);
            }
            for (service, env) in &step.observe {
                engine.observe_signature(hash(service, env));
            }

            assert_eq!(engine.sampler_count(), step.expected.len(), "{}", step.name);
            assert_eq!(engine.version(), step.version, "{}", step.name);

            for expected in &step.expected {
                let signature = hash(expected.service, expected.env);
                let target = engine.target_for(signature).expect("signature should be targeted");
                assert_eq!(target.target_tps(), expected.target_tps, "{}", step.name);
                assert_eq!(target.mechanism(), expected.mechanism, "{}", step.name);
                assert_eq!(target.rank(), expected.rank, "{}", step.name);

                let mut metrics: HashMap<String, f64> = HashMap::new();
                engine.decide_and_tag(signature, &mut metrics);
                assert_eq!(metrics.get(TAG_REMOTE_TPS), Some(&expected.target_tps), "{}", step.name);
                assert_eq!(metrics.get(TAG_REMOTE_VERSION), Some(&(step.version as f64)), "{}", step.name);
            }
        }
    }

    #[test]
    fn disabled() {
        assert!(RemoteRatesEngine::from_configuration(&RemoteRatesConfiguration::default()).is_none());
        assert!(RemoteRatesEngine::from_configuration(&RemoteRatesConfiguration::enabled_with_ceiling(0.0)).is_none());
        assert!(RemoteRatesEngine::from_configuration(&RemoteRatesConfiguration::enabled_with_ceiling(-1.0)).is_none());
        assert!(
            RemoteRatesEngine::from_configuration(&RemoteRatesConfiguration::enabled_with_ceiling(f64::NAN)).is_none()
        );
        assert!(RemoteRatesEngine::from_configuration(&RemoteRatesConfiguration::enabled_with_ceiling(1.0)).is_some());
    }

    #[test]
    fn cold_start() {
        let (engine, _mock) = test_engine();
        let signature = hash("web", "prod");

        engine.observe_signature(signature);
        assert_eq!(engine.sampler_count(), 0);
        assert_eq!(engine.version(), 0);

        let mut metrics = HashMap::from([("existing".to_string(), 1.0)]);
        assert!(engine.decide_and_tag(signature, &mut metrics));
        assert_eq!(metrics.len(), 1);
        assert_eq!(engine.sample_rate(signature), None);
    }

    #[test]
    fn no_eager_sampler_creation() {
        let (engine, _mock) = test_engine();
        let summary = engine
            .apply_update(&RatesUpdate::new(
                1,
                vec![RawTarget::new("a", "", 1.0), RawTarget::new("b", "", 2.0)],
            ))
            .unwrap();

        assert_eq!(summary.targets, 2);
        assert_eq!(engine.sampler_count(), 0);
        assert!(engine.target_for(hash("a", "")).is_some());
    }

    #[test]
    fn update_summary() {
        let (engine, _mock) = test_engine();
        engine.apply_update(&RatesUpdate::new(
            1,
            vec![RawTarget::new("a", "", 1.0), RawTarget::new("b", "", 1.0)],
        ));
        engine.observe_signature(hash("a", ""));
        engine.observe_signature(hash("b", ""));

        let summary = engine
            .apply_update(&RatesUpdate::new(
                2,
                vec![
                    RawTarget::new("a", "", 5.0),
                    RawTarget::new("a", "", 6.0),
                    RawTarget::new("", "", 1.0),
                    RawTarget::new("c", "", -1.0),
                ],
            ))
            .unwrap();

        assert_eq!(
            summary,
            UpdateSummary {
                version: 2,
                targets: 1,
                dropped: 2,
                duplicates: 1,
                retained: 1,
                evicted: 1,
            }
        );
        assert_eq!(engine.target_for(hash("a", "")).map(|t| t.target_tps()), Some(5.0));
    }

    #[test]
    fn target_replaced_in_place() {
        let (engine, mock) = test_engine();
        let signature = hash("web", "prod");
        engine.apply_update(&RatesUpdate::new(1, vec![RawTarget::new("web", "prod", 1.0)]));

        for _ in 0..100 {
            engine.observe_signature(signature);
            mock.increment(Duration::from_millis(10));
        }
        let estimated = engine.snapshot(signature).unwrap().0.estimated_tps();
        assert!(estimated > 0.0);

        engine.apply_update(&RatesUpdate::new(2, vec![RawTarget::new("web", "prod", 4.0)]));
        let (sampler, target, version) = engine.snapshot(signature).unwrap();
        assert_eq!(version, 2);
        assert_eq!(target.target_tps(), 4.0);
        assert_eq!(sampler.target().target_tps(), 4.0);
        assert_eq!(sampler.estimated_tps(), estimated);
    }

    #[test]
    fn stale_version_still_applied() {
        let (engine, _mock) = test_engine();
        engine.apply_update(&RatesUpdate::new(10, vec![RawTarget::new("a", "", 1.0)]));
        engine.apply_update(&RatesUpdate::new(3, vec![RawTarget::new("b", "", 1.0)]));

        assert_eq!(engine.version(), 3);
        assert!(engine.target_for(hash("a", "")).is_none());
        assert!(engine.target_for(hash("b", "")).is_some());
    }

    #[test]
    fn payload_rejection_keeps_catalog() {
        let (engine, _mock) = test_engine();
        let summary = engine
            .apply_payload(
                7,
                br#"{"target_tps": [{"service": "web", "value": 2.5}, {"service": 12}]}"#,
            )
            .unwrap();
        assert_eq!(summary.version, 7);
        assert_eq!(summary.targets, 1);
        assert_eq!(summary.dropped, 1);

        let result = engine.apply_payload(8, b"{ not json");
        assert!(matches!(result, Err(UpdateError::ConfigParse { version: 8, .. })));
        assert_eq!(engine.version(), 7);
        assert_eq!(engine.target_for(hash("web", "")).map(|t| t.target_tps()), Some(2.5));
    }

    #[test]
    fn tagging_is_unconditional() {
        let (engine, _mock) = test_engine();
        let signature = hash("web", "prod");
        engine.apply_update(&RatesUpdate::new(4, vec![RawTarget::new("web", "prod", 0.0)]));
        engine.observe_signature(signature);

        for _ in 0..10 {
            let mut metrics: HashMap<String, f64> = HashMap::new();
            assert!(!engine.decide_and_tag(signature, &mut metrics));
            assert_eq!(metrics.get(TAG_REMOTE_TPS), Some(&0.0));
            assert_eq!(metrics.get(TAG_REMOTE_VERSION), Some(&4.0));
        }
    }

    #[test]
    fn sample_rates() {
        let (engine, mock) = test_engine();
        engine.apply_update(&RatesUpdate::new(
            1,
            vec![RawTarget::new("slow", "", 100.0), RawTarget::new("fast", "", 1.0)],
        ));

        // Ten traces per second for both signatures, over several decay periods.
        for _ in 0..600 {
            engine.observe_signature(hash("slow", ""));
            engine.observe_signature(hash("fast", ""));
            mock.increment(Duration::from_millis(100));
        }

        assert_eq!(engine.sample_rate(hash("slow", "")), Some(1.0));
        let fast = engine.sample_rate(hash("fast", "")).unwrap();
        assert!((fast - 0.1).abs() < 0.01, "fast rate {}", fast);

        let rates = engine.sample_rates();
        assert_eq!(rates.len(), 2);
        assert!(rates.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn concurrent_first_observation() {
        let (engine, _mock) = test_engine();
        let engine = Arc::new(engine);
        let signature = hash("web", "prod");
        engine.apply_update(&RatesUpdate::new(1, vec![RawTarget::new("web", "prod", 10.0)]));

        let handles = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        engine.observe_signature(signature);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.sampler_count(), 1);
        let (sampler, _, _) = engine.snapshot(signature).unwrap();
        assert_eq!(sampler.estimated_tps(), 800.0);
    }

    #[test]
    fn tags_pair_target_with_its_version() {
        let (engine, _mock) = test_engine();
        let engine = Arc::new(engine);
        let signature = hash("web", "prod");

        // Every catalog targets the signature at a rate equal to its version.
        engine.apply_update(&RatesUpdate::new(1, vec![RawTarget::new("web", "prod", 1.0)]));
        engine.observe_signature(signature);

        let updater = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for version in 2..20_000u64 {
                    let target_tps = (version % 1000) as f64;
                    engine.apply_update(&RatesUpdate::new(
                        version % 1000,
                        vec![RawTarget::new("web", "prod", target_tps)],
                    ));
                }
            })
        };

        let readers = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..50_000 {
                        let mut metrics: HashMap<String, f64> = HashMap::new();
                        engine.decide_and_tag(signature, &mut metrics);
                        assert_eq!(metrics.get(TAG_REMOTE_TPS), metrics.get(TAG_REMOTE_VERSION));
                    }
                })
            })
            .collect::<Vec<_>>();

        updater.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn stop() {
        let (engine, _mock) = test_engine();
        let signature = hash("web", "prod");
        engine.apply_update(&RatesUpdate::new(1, vec![RawTarget::new("web", "prod", 10.0)]));
        engine.observe_signature(signature);
        assert_eq!(engine.sampler_count(), 1);

        engine.stop();
        engine.stop();
        assert!(engine.is_stopped());
        assert_eq!(engine.sampler_count(), 0);
        assert!(engine.target_for(signature).is_none());

        assert!(engine
            .apply_update(&RatesUpdate::new(2, vec![RawTarget::new("web", "prod", 10.0)]))
            .is_none());
        assert!(matches!(engine.apply_payload(3, b"{}"), Err(UpdateError::Stopped)));

        engine.observe_signature(signature);
        assert_eq!(engine.sampler_count(), 0);

        let mut metrics: HashMap<String, f64> = HashMap::new();
        assert!(engine.decide_and_tag(signature, &mut metrics));
        assert!(metrics.is_empty());
    }

    #[test]
    fn optional_engine() {
        let signature = hash("web", "prod");
        let mut metrics: HashMap<String, f64> = HashMap::new();

        let none: Option<&RemoteRatesEngine> = None;
        none.observe_signature(signature);
        assert!(none.decide_and_tag(signature, &mut metrics));
        assert!(metrics.is_empty());

        let (engine, _mock) = test_engine();
        engine.apply_update(&RatesUpdate::new(9, vec![RawTarget::new("web", "prod", 10.0)]));
        let shared = Some(Arc::new(engine));
        shared.observe_signature(signature);
        shared.decide_and_tag(signature, &mut metrics);
        assert_eq!(metrics.get(TAG_REMOTE_VERSION), Some(&9.0));
    }

    #[test]
    fn update_handler() {
        let (engine, _mock) = test_engine();
        let handler: &dyn UpdateHandler = &engine;
        handler.on_update(RatesUpdate::new(5, vec![RawTarget::new("web", "", 1.0)]));
        assert_eq!(engine.version(), 5);

        let error = RatesUpdate::from_versioned_json(br#"{"version": 6, "target_tps": 1}"#).unwrap_err();
        handler.on_rejected(&error);
        assert_eq!(engine.version(), 5);
        assert!(engine.target_for(hash("web", "")).is_some());
    }
}
