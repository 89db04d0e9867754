//! Configuration.
//!
//! Configuration is read from an optional YAML file and from environment variables, with environment variables taking
//! precedence. All settings live under `apm_config`:
//!
//! ```yaml
//! apm_config:
//!   features: [remote_rates]
//!   max_remote_traces_per_second: 100
//!   remote_rates:
//!     decay_period_secs: 10
//!     source: file
//!     file:
//!       path: /etc/datadog-agent/remote_rates.json
//!       poll_interval_secs: 5
//!     bootstrap:
//!       initial_retry_delay_secs: 1
//!       max_retry_delay_secs: 300
//! ```
//!
//! Environment variables use the `DD_` prefix, with `__` separating nested keys (for example,
//! `DD_APM_CONFIG__REMOTE_RATES__DECAY_PERIOD_SECS`). `DD_APM_FEATURES` (comma or space separated) and
//! `DD_APM_MAX_REMOTE_TPS` are accepted as shorthands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format as _, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

use crate::estimator::DEFAULT_DECAY_PERIOD;

/// Feature flag enabling the remote rates engine.
pub const REMOTE_RATES_FEATURE: &str = "remote_rates";

const ENV_ALIASES: &[(&str, &str)] = &[
    ("apm_features", "apm_config.features"),
    ("apm_max_remote_tps", "apm_config.max_remote_traces_per_second"),
];

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A configuration file could not be read.
    #[snafu(display("Failed to read configuration file '{}': {}", path.display(), source))]
    ReadFile {
        /// Path to the configuration file.
        path: PathBuf,

        /// Error source.
        source: std::io::Error,
    },

    /// The merged configuration could not be deserialized.
    #[snafu(display("Invalid configuration: {}", source))]
    Extract {
        /// Error source.
        source: figment::Error,
    },
}

/// A configuration loader pulling from YAML files and environment variables.
///
/// Sources added later take precedence over sources added earlier.
#[derive(Default)]
pub struct ConfigurationLoader {
    figment: Figment,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, an error will be returned. Invalid YAML is reported when the configuration is
    /// extracted.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFile { path })?;
        self.figment = self.figment.admerge(Yaml::string(&contents));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring it if it can't be read.
    pub fn try_from_yaml<P>(self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self {
                figment: self.figment.admerge(Yaml::string(&contents)),
            },
            Err(e) => {
                debug!(error = %e, file_path = %path.display(), "Unable to read YAML configuration file. Ignoring.");
                self
            }
        }
    }

    /// Loads configuration from environment variables starting with `prefix`.
    ///
    /// An underscore is appended to the prefix if it does not already end with one. Double underscores in variable
    /// names separate nested keys.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        let env = Env::prefixed(&prefix).map(|key| {
            let key = key.as_str();
            ENV_ALIASES
                .iter()
                .find(|(alias, _)| *alias == key)
                .map(|(_, target)| target.to_string())
                .unwrap_or_else(|| key.replace("__", "."))
                .into()
        });
        self.figment = self.figment.admerge(env);
        Ok(self)
    }

    /// Merges in the given serializable values.
    pub fn with_values<T: Serialize>(mut self, values: T) -> Self {
        self.figment = self.figment.admerge(Serialized::defaults(values));
        self
    }

    /// Consumes the loader, deserializing the merged configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.figment.extract().context(Extract)
    }
}

const fn default_max_remote_traces_per_second() -> f64 {
    100.0
}

fn default_decay_period_secs() -> f64 {
    DEFAULT_DECAY_PERIOD.as_secs_f64()
}

fn default_source() -> String {
    "file".to_string()
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_initial_retry_delay_secs() -> u64 {
    1
}

const fn default_max_retry_delay_secs() -> u64 {
    300
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum FeatureList {
    List(Vec<String>),
    Joined(String),
}

impl Default for FeatureList {
    fn default() -> Self {
        FeatureList::List(Vec::new())
    }
}

impl FeatureList {
    fn contains(&self, feature: &str) -> bool {
        match self {
            FeatureList::List(features) => features.iter().any(|f| f.trim() == feature),
            FeatureList::Joined(features) => features
                .split([',', ' '])
                .any(|f| f.trim() == feature),
        }
    }
}

#[derive(Deserialize)]
struct Wrapper {
    #[serde(default)]
    apm_config: RemoteRatesConfiguration,
}

/// Remote rates configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteRatesConfiguration {
    /// APM feature flags. The engine only runs when `remote_rates` is listed.
    ///
    /// Defaults to no features.
    #[serde(default)]
    features: FeatureList,

    /// Ceiling applied to every remote target, in traces per second.
    ///
    /// A value of zero or less disables the engine. Defaults to 100.
    #[serde(default = "default_max_remote_traces_per_second")]
    max_remote_traces_per_second: f64,

    /// Engine and delivery settings.
    #[serde(default)]
    remote_rates: RemoteRatesSettings,
}

#[derive(Clone, Debug, Deserialize)]
struct RemoteRatesSettings {
    #[serde(default = "default_decay_period_secs")]
    decay_period_secs: f64,

    #[serde(default = "default_source")]
    source: String,

    #[serde(default)]
    file: FileSourceConfiguration,

    #[serde(default)]
    bootstrap: BootstrapConfiguration,
}

impl Default for RemoteRatesSettings {
    fn default() -> Self {
        Self {
            decay_period_secs: default_decay_period_secs(),
            source: default_source(),
            file: FileSourceConfiguration::default(),
            bootstrap: BootstrapConfiguration::default(),
        }
    }
}

/// Settings for the file-polling update source.
#[derive(Clone, Debug, Deserialize)]
pub struct FileSourceConfiguration {
    /// Path to the JSON file holding the latest update.
    #[serde(default)]
    path: Option<PathBuf>,

    /// How often the file is checked for changes, in seconds.
    ///
    /// Defaults to 5 seconds.
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,
}

impl FileSourceConfiguration {
    /// Creates a new `FileSourceConfiguration` for the given path.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: Some(path.into()),
            poll_interval_secs: poll_interval.as_secs().max(1),
        }
    }

    /// Returns the path of the update file, if configured.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for FileSourceConfiguration {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Retry settings for bootstrapping an update source.
#[derive(Clone, Debug, Deserialize)]
pub struct BootstrapConfiguration {
    /// Delay before the first retry, in seconds.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_initial_retry_delay_secs")]
    initial_retry_delay_secs: u64,

    /// Upper bound on the delay between retries, in seconds.
    ///
    /// Defaults to 300 seconds.
    #[serde(default = "default_max_retry_delay_secs")]
    max_retry_delay_secs: u64,
}

impl BootstrapConfiguration {
    /// Returns the delay before the first retry.
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_secs(self.initial_retry_delay_secs)
    }

    /// Returns the upper bound on the delay between retries.
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs.max(self.initial_retry_delay_secs))
    }
}

impl Default for BootstrapConfiguration {
    fn default() -> Self {
        Self {
            initial_retry_delay_secs: default_initial_retry_delay_secs(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
        }
    }
}

impl RemoteRatesConfiguration {
    /// Creates a new `RemoteRatesConfiguration` from the given loader.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error will be returned.
    pub fn from_loader(loader: ConfigurationLoader) -> Result<Self, ConfigurationError> {
        let wrapper = loader.into_typed::<Wrapper>()?;
        Ok(wrapper.apm_config)
    }

    /// Creates a configuration with the engine enabled and the given ceiling.
    pub fn enabled_with_ceiling(max_remote_traces_per_second: f64) -> Self {
        Self {
            features: FeatureList::List(vec![REMOTE_RATES_FEATURE.to_string()]),
            max_remote_traces_per_second,
            ..Default::default()
        }
    }

    /// Sets the decay period of the rate estimators.
    pub fn with_decay_period(mut self, decay_period: Duration) -> Self {
        self.remote_rates.decay_period_secs = decay_period.as_secs_f64();
        self
    }

    /// Sets the file-polling source settings.
    pub fn with_file_source(mut self, file: FileSourceConfiguration) -> Self {
        self.remote_rates.file = file;
        self
    }

    /// Returns `true` if the `remote_rates` feature is enabled.
    pub fn feature_enabled(&self) -> bool {
        self.features.contains(REMOTE_RATES_FEATURE)
    }

    /// Returns the ceiling applied to every remote target.
    pub const fn max_remote_traces_per_second(&self) -> f64 {
        self.max_remote_traces_per_second
    }

    /// Returns the decay period of the rate estimators.
    pub fn decay_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.remote_rates.decay_period_secs).unwrap_or(DEFAULT_DECAY_PERIOD)
    }

    /// Returns the name of the update source to build.
    pub fn source(&self) -> &str {
        &self.remote_rates.source
    }

    /// Returns the file-polling source settings.
    pub fn file_source(&self) -> &FileSourceConfiguration {
        &self.remote_rates.file
    }

    /// Returns the bootstrap retry settings.
    pub fn bootstrap(&self) -> &BootstrapConfiguration {
        &self.remote_rates.bootstrap
    }
}

impl Default for RemoteRatesConfiguration {
    fn default() -> Self {
        Self {
            features: FeatureList::default(),
            max_remote_traces_per_second: default_max_remote_traces_per_second(),
            remote_rates: RemoteRatesSettings::default(),
        }
    }
}
