use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Enable verbose output. (Specify twice for more verbosity.)
    #[arg(global = true, short = 'v', long, action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,

    /// Path to a YAML configuration file.
    ///
    /// Settings are read from `apm_config`. Environment variables prefixed with `DD_` take precedence.
    #[arg(global = true, short = 'c', long = "config")]
    pub config_file: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Action,
}

impl Cli {
    /// Gets the configured log level based on the user-supplied verbosity level.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand)]
pub enum Action {
    /// Follow the configured update source, applying updates as they arrive.
    #[command(name = "follow")]
    Follow(FollowConfig),

    /// Replay a scenario of updates against synthetic traffic, in virtual time.
    #[command(name = "simulate")]
    Simulate(SimulateConfig),
}

/// Follow configuration.
#[derive(Args, Clone)]
pub struct FollowConfig {
    /// How often to log the engine state, in seconds.
    #[arg(long, default_value_t = 10)]
    pub report_interval_secs: u64,
}

/// Simulation configuration.
#[derive(Args, Clone)]
pub struct SimulateConfig {
    /// Path to the JSON scenario file.
    #[arg(long)]
    pub scenario: PathBuf,

    /// Length of a simulation step, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub step_ms: u64,

    /// Length of the reporting window, in seconds.
    #[arg(long, default_value_t = 10)]
    pub report_secs: u64,
}
