use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quanta::Mock;
use remote_rates::errors::GenericError;
use remote_rates::{MetricsSink, RemoteRatesEngine, ServiceSignature, Signature, TAG_REMOTE_TPS, TAG_REMOTE_VERSION};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

const fn default_duration_secs() -> u64 {
    300
}

/// A simulation scenario.
///
/// ```json
/// {
///   "duration_secs": 120,
///   "updates": [{ "at_secs": 0, "version": 1, "target_tps": [{ "service": "web", "value": 10 }] }],
///   "traffic": [{ "service": "web", "tps": 100 }]
/// }
/// ```
#[derive(Deserialize)]
pub struct Scenario {
    #[serde(default = "default_duration_secs")]
    duration_secs: u64,

    #[serde(default)]
    updates: Vec<TimedUpdate>,

    traffic: Vec<TrafficClass>,
}

#[derive(Deserialize)]
struct TimedUpdate {
    #[serde(default)]
    at_secs: f64,

    #[serde(default)]
    version: u64,

    #[serde(default)]
    target_tps: serde_json::Value,
}

#[derive(Deserialize)]
struct TrafficClass {
    service: String,

    #[serde(default)]
    env: String,

    tps: f64,
}

impl Scenario {
    /// Loads a scenario from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, GenericError> {
        let contents = std::fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

/// Metrics a sampling decision writes onto a root span.
#[derive(Default)]
struct RootSpanMetrics {
    remote_tps: Option<f64>,
    remote_version: Option<f64>,
}

impl MetricsSink for RootSpanMetrics {
    fn set_metric(&mut self, key: &str, value: f64) {
        match key {
            TAG_REMOTE_TPS => self.remote_tps = Some(value),
            TAG_REMOTE_VERSION => self.remote_version = Some(value),
            _ => {}
        }
    }
}

/// Per traffic class statistics over one reporting window.
pub struct ClassReport {
    pub service: ServiceSignature,
    pub offered_tps: f64,
    pub kept_tps: f64,
    pub remote_tps: Option<f64>,
    pub remote_version: Option<f64>,
    pub sample_rate: Option<f64>,
}

/// Statistics over one reporting window.
pub struct WindowReport {
    pub start: Duration,
    pub end: Duration,
    pub classes: Vec<ClassReport>,
}

#[derive(Default)]
struct Counters {
    carry: f64,
    seen: u64,
    kept: u64,
    last_tags: RootSpanMetrics,
}

/// Replays `scenario` against `engine`, advancing `mock` in steps of `step`.
///
/// Traffic for every class arrives at a steady rate. Each trace is first observed, then voted on, the same way an
/// ingestion pipeline would.
pub fn simulate(
    engine: &RemoteRatesEngine, mock: &Arc<Mock>, scenario: &Scenario, step: Duration, report_window: Duration,
) -> Vec<WindowReport> {
    let step = step.max(Duration::from_millis(1));
    let steps_per_window = (report_window.as_nanos() / step.as_nanos()).max(1) as u64;
    let total_steps = (Duration::from_secs(scenario.duration_secs).as_nanos() / step.as_nanos()) as u64;

    let mut updates = scenario.updates.iter().collect::<Vec<_>>();
    updates.sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
    let mut pending_updates = updates.into_iter().peekable();

    let classes = scenario
        .traffic
        .iter()
        .map(|class| {
            let service = ServiceSignature::new(class.service.clone(), class.env.clone());
            let signature = service.hash();
            (service, signature, class.tps.max(0.0))
        })
        .collect::<Vec<(ServiceSignature, Signature, f64)>>();
    let mut counters = classes.iter().map(|_| Counters::default()).collect::<Vec<_>>();

    let mut reports = Vec::new();
    let mut elapsed = Duration::ZERO;
    let mut window_start = Duration::ZERO;

    for step_idx in 0..total_steps {
        while let Some(update) = pending_updates.next_if(|u| u.at_secs <= elapsed.as_secs_f64()) {
            apply_timed_update(engine, update, elapsed);
        }

        for ((_, signature, tps), counters) in classes.iter().zip(counters.iter_mut()) {
            counters.carry += tps * step.as_secs_f64();
            while counters.carry >= 1.0 {
                counters.carry -= 1.0;
                counters.seen += 1;

                engine.observe_signature(*signature);
                let mut tags = RootSpanMetrics::default();
                if engine.decide_and_tag(*signature, &mut tags) {
                    counters.kept += 1;
                }
                counters.last_tags = tags;
            }
        }

        mock.increment(step);
        elapsed += step;

        if (step_idx + 1) % steps_per_window == 0 || step_idx + 1 == total_steps {
            reports.push(close_window(engine, &classes, &mut counters, window_start, elapsed));
            window_start = elapsed;
        }
    }

    reports
}

fn apply_timed_update(engine: &RemoteRatesEngine, update: &TimedUpdate, elapsed: Duration) {
    let payload = json!({ "target_tps": update.target_tps });
    let payload = match serde_json::to_vec(&payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(version = update.version, error = %e, "Failed to encode scenario update.");
            return;
        }
    };

    match engine.apply_payload(update.version, &payload) {
        Ok(summary) => debug!(
            at = ?elapsed,
            version = summary.version,
            targets = summary.targets,
            "Applied scenario update."
        ),
        Err(e) => warn!(at = ?elapsed, version = update.version, error = %e, "Scenario update rejected."),
    }
}

fn close_window(
    engine: &RemoteRatesEngine, classes: &[(ServiceSignature, Signature, f64)], counters: &mut [Counters],
    start: Duration, end: Duration,
) -> WindowReport {
    let window_secs = (end - start).as_secs_f64();
    let classes = classes
        .iter()
        .zip(counters.iter_mut())
        .map(|((service, signature, _), counters)| {
            let report = ClassReport {
                service: service.clone(),
                offered_tps: counters.seen as f64 / window_secs,
                kept_tps: counters.kept as f64 / window_secs,
                remote_tps: counters.last_tags.remote_tps,
                remote_version: counters.last_tags.remote_version,
                sample_rate: engine.sample_rate(*signature),
            };
            counters.seen = 0;
            counters.kept = 0;
            counters.last_tags = RootSpanMetrics::default();
            report
        })
        .collect();

    WindowReport { start, end, classes }
}

fn format_optional(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

/// Writes the reports to standard output.
pub fn print_reports(reports: &[WindowReport]) {
    println!(
        "{:>8} {:>8}  {:<32} {:>10} {:>10} {:>10} {:>8} {:>8}",
        "start", "end", "service", "offered", "kept", "remote", "version", "rate"
    );
    for report in reports {
        for class in &report.classes {
            println!(
                "{:>7.1}s {:>7.1}s  {:<32} {:>10.2} {:>10.2} {:>10} {:>8} {:>8}",
                report.start.as_secs_f64(),
                report.end.as_secs_f64(),
                class.service.to_string(),
                class.offered_tps,
                class.kept_tps,
                format_optional(class.remote_tps, 2),
                format_optional(class.remote_version, 0),
                format_optional(class.sample_rate, 4),
            );
        }
    }
}

/// Runs the scenario at `path` against `engine` and prints the results.
pub fn run_scenario(
    engine: &RemoteRatesEngine, mock: &Arc<Mock>, path: &Path, step: Duration, report_window: Duration,
) -> Result<(), GenericError> {
    let scenario = Scenario::from_file(path)?;
    info!(
        scenario = %path.display(),
        duration_secs = scenario.duration_secs,
        updates = scenario.updates.len(),
        traffic_classes = scenario.traffic.len(),
        "Running simulation."
    );

    let reports = simulate(engine, mock, &scenario, step, report_window);
    print_reports(&reports);
    Ok(())
}
