use std::collections::BTreeMap;

use snafu::ResultExt as _;
use tracing::debug;

use super::{FileUpdateSource, UpdateSource};
use crate::config::RemoteRatesConfiguration;
use crate::errors::{Build, GenericError, SourceError, UnknownSource};

/// A factory building an update source from configuration.
pub type SourceFactory =
    Box<dyn Fn(&RemoteRatesConfiguration) -> Result<Box<dyn UpdateSource>, GenericError> + Send + Sync>;

/// A registry of update source factories, keyed by name.
///
/// The registry starts out empty: sources become available only once explicitly registered, typically at startup
/// through [`register_builtin_sources`].
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// Creates an empty `SourceRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under the given name, replacing any factory previously registered under it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&RemoteRatesConfiguration) -> Result<Box<dyn UpdateSource>, GenericError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            debug!(source = %name, "Replaced previously registered update source.");
        }
    }

    /// Returns `true` if a factory is registered under the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the registered names, in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds the update source registered under `name`.
    ///
    /// # Errors
    ///
    /// If no factory is registered under `name`, or if the factory fails, an error is returned.
    pub fn build(&self, name: &str, config: &RemoteRatesConfiguration) -> Result<Box<dyn UpdateSource>, SourceError> {
        let Some(factory) = self.factories.get(name) else {
            return UnknownSource {
                name,
                known: self.factories.keys().cloned().collect::<Vec<_>>(),
            }
            .fail();
        };

        factory(config).context(Build { name })
    }

    /// Builds the update source selected by the configuration.
    ///
    /// # Errors
    ///
    /// If the selected source is unknown, or fails to build, an error is returned.
    pub fn build_configured(&self, config: &RemoteRatesConfiguration) -> Result<Box<dyn UpdateSource>, SourceError> {
        self.build(config.source(), config)
    }
}

/// Registers the update sources shipped with this crate.
///
/// - `file`: [`FileUpdateSource`], polling a JSON file.
pub fn register_builtin_sources(registry: &mut SourceRegistry) {
    registry.register("file", |config| {
        let source = FileUpdateSource::from_configuration(config.file_source())?;
        Ok(Box::new(source) as Box<dyn UpdateSource>)
    });
}
