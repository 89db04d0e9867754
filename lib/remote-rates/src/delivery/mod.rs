//! Configuration delivery.
//!
//! Updates reach the engine through an [`UpdateHandler`]. Anything able to produce updates implements
//! [`UpdateSource`], and sources are looked up by name in a [`SourceRegistry`] populated at startup. Bringing a source
//! up is retried with exponential backoff through [`Bootstrap`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::errors::{BootstrapError, GenericError, UpdateError};
use crate::update::RatesUpdate;

mod bootstrap;
pub use self::bootstrap::Bootstrap;

mod file;
pub use self::file::FileUpdateSource;

mod registry;
pub use self::registry::{register_builtin_sources, SourceFactory, SourceRegistry};

/// A receiver of remote rates updates.
///
/// Updates may be pushed from any thread.
pub trait UpdateHandler: Send + Sync {
    /// Handles a new update.
    fn on_update(&self, update: RatesUpdate);

    /// Handles a payload the source received but could not parse as a whole.
    ///
    /// The previously delivered update stays in effect.
    fn on_rejected(&self, error: &UpdateError);
}

/// A producer of remote rates updates.
#[async_trait]
pub trait UpdateSource: Send {
    /// Returns the name of this source.
    fn name(&self) -> &str;

    /// Checks that the source is able to deliver updates.
    ///
    /// # Errors
    ///
    /// If the source is not ready yet, an error is returned. Callers are expected to retry later.
    async fn ensure_ready(&mut self) -> Result<(), GenericError>;

    /// Pushes updates into `handler` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// If the source fails in a way it cannot recover from, an error is returned.
    async fn run(
        &mut self, handler: Arc<dyn UpdateHandler>, shutdown: oneshot::Receiver<()>,
    ) -> Result<(), GenericError>;
}

/// Brings `source` up, retrying with backoff, and then runs it until `shutdown` resolves.
///
/// If `shutdown` resolves before the source is ready, this returns immediately.
///
/// # Errors
///
/// If the source fails while running, an error is returned.
pub async fn run_source(
    mut source: Box<dyn UpdateSource>, handler: Arc<dyn UpdateHandler>, mut bootstrap: Bootstrap,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), GenericError> {
    while !bootstrap.is_ready() {
        if let Err(BootstrapError::Backoff { retry_in }) = bootstrap.check(Instant::now().into_std()) {
            debug!(source = source.name(), ?retry_in, "Waiting before retrying update source.");
            select! {
                _ = sleep(retry_in) => continue,
                _ = &mut shutdown => return Ok(()),
            }
        }

        let outcome = select! {
            outcome = source.ensure_ready() => outcome,
            _ = &mut shutdown => return Ok(()),
        };
        if let Err(e) = bootstrap.record(Instant::now().into_std(), outcome) {
            warn!(source = source.name(), error = %e, "Update source not ready.");
        }
    }

    debug!(source = source.name(), "Update source ready.");
    source.run(handler, shutdown).await
}
