//! Error types.

use std::time::Duration;

use snafu::Snafu;

/// A generic error.
///
/// Used for application-level plumbing (sources, factories, configuration glue) where callers only need to report
/// the error rather than match on it.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`] from a string literal, a format string, or an existing error value.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::errors::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::errors::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::errors::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

/// An error applying a remote rates update.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum UpdateError {
    /// The update payload could not be parsed as a whole.
    ///
    /// The previously applied catalog remains authoritative.
    #[snafu(display("failed to parse remote rates payload (version {}): {}", version, source))]
    ConfigParse {
        /// Version the payload was delivered with.
        version: u64,

        /// Error source.
        source: serde_json::Error,
    },

    /// The engine has been stopped and no longer accepts updates.
    #[snafu(display("remote rates engine is stopped"))]
    Stopped,
}

/// An error from a [`Bootstrap`][crate::delivery::Bootstrap] readiness check.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum BootstrapError {
    /// The previous attempt failed recently and the backoff interval has not elapsed yet.
    #[snafu(display("not ready, next attempt allowed in {:?}", retry_in))]
    Backoff {
        /// Time remaining until the next attempt is allowed.
        retry_in: Duration,
    },

    /// The bootstrap attempt itself failed.
    #[snafu(display("bootstrap attempt {} failed: {}", attempts, source))]
    Attempt {
        /// Number of consecutive failed attempts, including this one.
        attempts: u32,

        /// Error source.
        source: GenericError,
    },
}

/// An error building an update source from the registry.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum SourceError {
    /// No factory was registered under the requested name.
    #[snafu(display("no update source registered under '{}' (known: {})", name, known.join(", ")))]
    UnknownSource {
        /// Requested source name.
        name: String,

        /// Names of the registered sources.
        known: Vec<String>,
    },

    /// The factory failed to build the source.
    #[snafu(display("failed to build update source '{}': {}", name, source))]
    Build {
        /// Requested source name.
        name: String,

        /// Error source.
        source: GenericError,
    },
}
