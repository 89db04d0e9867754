use tracing::{level_filters::LevelFilter, Subscriber};
use tracing_subscriber::{layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _, EnvFilter, Layer};

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Filtering directives are read from `DD_LOG_LEVEL`, falling back to `default_level`. If `DD_LOG_FORMAT_JSON` is set
/// to `true` or `1`, logs are written as JSON.
pub fn initialize_logging(default_level: LevelFilter) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let is_json = std::env::var("DD_LOG_FORMAT_JSON")
        .map(|s| s.trim().to_lowercase())
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);

    let level_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("DD_LOG_LEVEL")
        .from_env_lossy();

    if is_json {
        tracing_subscriber::registry()
            .with(initialize_tracing_json().with_filter(level_filter))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(initialize_tracing_pretty().with_filter(level_filter))
            .try_init()?;
    }

    Ok(())
}

fn initialize_tracing_json<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new()
        .json()
        .flatten_event(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
}

fn initialize_tracing_pretty<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new()
        .with_target(false)
        .with_writer(std::io::stderr)
}
