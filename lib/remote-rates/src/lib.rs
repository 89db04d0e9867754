//! Remotely controlled adaptive sampling.
//!
//! Operators declare a target throughput, in traces per second, for individual services. Targets are delivered as
//! versioned updates and reconciled into a catalog. Once traffic for a targeted service is observed, an adaptive
//! sampler estimates its arrival rate and keeps just enough traces to meet the target.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod catalog;
mod collections;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod errors;
pub mod estimator;
pub mod sampler;
pub mod signature;
mod telemetry;
pub mod update;

pub use self::engine::{RemoteRatesEngine, RemoteVote, UpdateSummary};
pub use self::sampler::{MetricsSink, TAG_REMOTE_TPS, TAG_REMOTE_VERSION};
pub use self::signature::{ServiceSignature, Signature};
pub use self::update::{RatesUpdate, RawTarget};
