use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use quanta::Clock;
use remote_rates::config::{ConfigurationLoader, RemoteRatesConfiguration, REMOTE_RATES_FEATURE};
use remote_rates::delivery::{register_builtin_sources, run_source, Bootstrap, SourceRegistry};
use remote_rates::errors::GenericError;
use remote_rates::{generic_error, RemoteRatesEngine};
use serde_json::json;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::interval;
use tracing::{error, info};

mod config;
use self::config::{Action, Cli, FollowConfig, SimulateConfig};

mod logging;
use self::logging::{fatal_and_exit, initialize_logging};

mod simulate;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(cli.log_level()) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    match run(cli).await {
        Ok(()) => info!("remote-rates-sim stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    match cli.action {
        Action::Follow(follow_config) => {
            let config = load_configuration(cli.config_file.as_deref(), false)?;
            follow(config, follow_config).await
        }
        Action::Simulate(simulate_config) => {
            let config = load_configuration(cli.config_file.as_deref(), true)?;
            run_simulation(config, simulate_config)
        }
    }
}

fn load_configuration(
    config_file: Option<&Path>, enable_by_default: bool,
) -> Result<RemoteRatesConfiguration, GenericError> {
    let mut loader = ConfigurationLoader::default();
    if enable_by_default {
        loader = loader.with_values(json!({ "apm_config": { "features": [REMOTE_RATES_FEATURE] } }));
    }
    if let Some(config_file) = config_file {
        loader = loader.from_yaml(config_file)?;
    }
    let loader = loader.from_environment("DD")?;

    Ok(RemoteRatesConfiguration::from_loader(loader)?)
}

fn build_engine(config: &RemoteRatesConfiguration, clock: Clock) -> Result<RemoteRatesEngine, GenericError> {
    RemoteRatesEngine::with_clock(config, clock).ok_or_else(|| {
        generic_error!(
            "Remote rates engine is disabled. Add '{}' to apm_config.features and set a positive \
             apm_config.max_remote_traces_per_second.",
            REMOTE_RATES_FEATURE
        )
    })
}

async fn follow(config: RemoteRatesConfiguration, follow_config: FollowConfig) -> Result<(), GenericError> {
    let engine = Arc::new(build_engine(&config, Clock::new())?);

    let mut registry = SourceRegistry::new();
    register_builtin_sources(&mut registry);
    let source = registry.build_configured(&config)?;
    info!(source = source.name(), max_tps = engine.max_tps(), "Following remote rates updates.");

    let bootstrap = Bootstrap::from_configuration(config.bootstrap());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let source_task = tokio::spawn(run_source(source, engine.clone(), bootstrap, shutdown_rx));

    let mut report = interval(Duration::from_secs(follow_config.report_interval_secs.max(1)));
    loop {
        select! {
            _ = report.tick() => {
                info!(version = engine.version(), samplers = engine.sampler_count(), "Remote rates engine state.");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Stopping...");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    let result = source_task.await?;
    engine.stop();
    result
}

fn run_simulation(config: RemoteRatesConfiguration, simulate_config: SimulateConfig) -> Result<(), GenericError> {
    let (clock, mock) = Clock::mock();
    let engine = build_engine(&config, clock)?;

    simulate::run_scenario(
        &engine,
        &mock,
        &simulate_config.scenario,
        Duration::from_millis(simulate_config.step_ms),
        Duration::from_secs(simulate_config.report_secs.max(1)),
    )
}
