use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{UpdateHandler, UpdateSource};
use crate::config::FileSourceConfiguration;
use crate::errors::GenericError;
use crate::generic_error;
use crate::update::RatesUpdate;

/// An update source that polls a JSON file.
///
/// The file holds a single update, including its version:
///
/// ```json
/// { "version": 12, "target_tps": [{ "service": "web", "env": "prod", "value": 20 }] }
/// ```
///
/// An update is pushed every time the content of the file changes. Content that fails to parse is handed to
/// [`UpdateHandler::on_rejected`] once and skipped until the file changes again.
pub struct FileUpdateSource {
    path: PathBuf,
    poll_interval: Duration,
    last_contents: Option<Vec<u8>>,
}

impl FileUpdateSource {
    /// Creates a new `FileUpdateSource` polling `path` every `poll_interval`.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            last_contents: None,
        }
    }

    /// Creates a new `FileUpdateSource` from the given configuration.
    ///
    /// # Errors
    ///
    /// If no path is configured, an error is returned.
    pub fn from_configuration(config: &FileSourceConfiguration) -> Result<Self, GenericError> {
        let path = config
            .path()
            .ok_or_else(|| generic_error!("No remote rates file configured (apm_config.remote_rates.file.path)."))?;
        Ok(Self::new(path, config.poll_interval()))
    }

    /// Returns the path of the polled file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file and pushes an update into `handler` if its content changed since the last poll.
    ///
    /// Returns `true` if an update was pushed. New content that can't be parsed is rejected through `handler`, and
    /// `false` is returned.
    ///
    /// # Errors
    ///
    /// If the file can't be read, an error is returned.
    pub async fn poll_once(&mut self, handler: &dyn UpdateHandler) -> Result<bool, GenericError> {
        let contents = fs::read(&self.path).await?;
        if self.last_contents.as_deref() == Some(contents.as_slice()) {
            return Ok(false);
        }

        let parsed = RatesUpdate::from_versioned_json(&contents);
        self.last_contents = Some(contents);
        let update = match parsed {
            Ok(update) => update,
            Err(e) => {
                handler.on_rejected(&e);
                return Ok(false);
            }
        };

        debug!(file_path = %self.path.display(), version = update.version(), "Remote rates file changed.");
        handler.on_update(update);
        Ok(true)
    }
}

#[async_trait]
impl UpdateSource for FileUpdateSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn ensure_ready(&mut self) -> Result<(), GenericError> {
        let metadata = fs::metadata(&self.path)
            .await
            .map_err(|e| generic_error!("Unable to access '{}': {}", self.path.display(), e))?;
        if !metadata.is_file() {
            return Err(generic_error!("'{}' is not a file.", self.path.display()));
        }
        Ok(())
    }

    async fn run(
        &mut self, handler: Arc<dyn UpdateHandler>, mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), GenericError> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(handler.as_ref()).await {
                        warn!(file_path = %self.path.display(), error = %e, "Failed to load remote rates file.");
                    }
                }
                _ = &mut shutdown => {
                    debug!(file_path = %self.path.display(), "Stopping remote rates file source.");
                    return Ok(());
                }
            }
        }
    }
}
