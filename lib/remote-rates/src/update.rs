//! Remote rates updates.
//!
//! An update is a versioned list of raw target declarations, as pushed by the configuration delivery collaborator. The
//! JSON form mirrors the control plane's sampling payload:
//!
//! ```json
//! {
//!   "version": 30,
//!   "target_tps": [
//!     { "service": "web", "env": "prod", "value": 3.2, "mechanism": 5, "rank": 3 }
//!   ]
//! }
//! ```
//!
//! The top-level `version` is only read by [`RatesUpdate::from_versioned_json`]; when the version travels out of band,
//! use [`RatesUpdate::from_json`].

use serde::Deserialize;
use snafu::ResultExt as _;
use tracing::debug;

use crate::errors::{ConfigParse, UpdateError};
use crate::signature::{hash, Signature};

/// A single target declaration, before reconciliation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawTarget {
    /// Service name.
    #[serde(default)]
    pub service: String,

    /// Environment.
    #[serde(default)]
    pub env: String,

    /// Desired traces per second.
    #[serde(default)]
    pub value: f64,

    /// Identifier of the remote rule that produced this target.
    #[serde(default)]
    pub mechanism: u32,

    /// Priority among competing declarations for the same signature. Higher wins.
    #[serde(default)]
    pub rank: u32,
}

impl RawTarget {
    /// Creates a new `RawTarget` with a zero mechanism and rank.
    pub fn new(service: impl Into<String>, env: impl Into<String>, value: f64) -> Self {
        Self {
            service: service.into(),
            env: env.into(),
            value,
            ..Default::default()
        }
    }

    /// Sets the mechanism.
    pub fn with_mechanism(mut self, mechanism: u32) -> Self {
        self.mechanism = mechanism;
        self
    }

    /// Sets the rank.
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// Computes the signature this target applies to.
    pub fn signature(&self) -> Signature {
        hash(&self.service, &self.env)
    }
}

/// A versioned set of raw target declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RatesUpdate {
    version: u64,
    targets: Vec<RawTarget>,
    malformed: usize,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    version: u64,

    #[serde(default)]
    target_tps: Vec<serde_json::Value>,
}

impl RatesUpdate {
    /// Creates a new `RatesUpdate`.
    pub fn new(version: u64, targets: Vec<RawTarget>) -> Self {
        Self {
            version,
            targets,
            malformed: 0,
        }
    }

    /// Parses an update from a JSON payload, using the given version.
    ///
    /// Entries that fail to deserialize are skipped and counted in [`malformed`][Self::malformed]; the rest of the
    /// payload still applies.
    ///
    /// # Errors
    ///
    /// If the payload as a whole is not a valid JSON object of the expected shape, an error is returned.
    pub fn from_json(version: u64, payload: &[u8]) -> Result<Self, UpdateError> {
        let payload: Payload = serde_json::from_slice(payload).context(ConfigParse { version })?;
        Ok(Self::from_entries(version, payload.target_tps))
    }

    /// Parses an update from a JSON payload carrying its own `version` field.
    ///
    /// # Errors
    ///
    /// If the payload as a whole is not a valid JSON object of the expected shape, an error is returned. The error
    /// carries the payload's `version` when it can be read, and `0` otherwise (for example when the payload is not
    /// JSON at all).
    pub fn from_versioned_json(payload: &[u8]) -> Result<Self, UpdateError> {
        let value: serde_json::Value = serde_json::from_slice(payload).context(ConfigParse { version: 0u64 })?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default();
        let payload = Payload::deserialize(value).context(ConfigParse { version })?;
        Ok(Self::from_entries(payload.version, payload.target_tps))
    }

    fn from_entries(version: u64, entries: Vec<serde_json::Value>) -> Self {
        let mut malformed = 0;
        let targets = entries
            .into_iter()
            .enumerate()
            .filter_map(|(idx, entry)| match serde_json::from_value::<RawTarget>(entry) {
                Ok(target) => Some(target),
                Err(e) => {
                    debug!(version, entry_idx = idx, error = %e, "Skipping malformed remote rates entry.");
                    malformed += 1;
                    None
                }
            })
            .collect();

        Self {
            version,
            targets,
            malformed,
        }
    }

    /// Returns the version of this update.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the raw target declarations.
    pub fn targets(&self) -> &[RawTarget] {
        &self.targets
    }

    /// Returns the number of entries dropped while parsing.
    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_payload() {
        let payload = br#"{
            "target_tps": [
                { "service": "willBeRemoved", "value": 3.2 },
                { "service": "willBeRemoved", "env": "env2", "value": 33 },
                { "service": "keep", "value": 1, "mechanism": 5, "rank": 3 }
            ]
        }"#;

        let update = RatesUpdate::from_json(30, payload).unwrap();
        assert_eq!(update.version(), 30);
        assert_eq!(update.malformed(), 0);
        assert_eq!(
            update.targets(),
            &[
                RawTarget::new("willBeRemoved", "", 3.2),
                RawTarget::new("willBeRemoved", "env2", 33.0),
                RawTarget::new("keep", "", 1.0).with_mechanism(5).with_rank(3),
            ]
        );
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let payload = br#"{
            "target_tps": [
                { "service": "keep", "value": 10 },
                { "service": "broken", "value": "ten" },
                42,
                { "service": "also-kept", "rank": 2 }
            ]
        }"#;

        let update = RatesUpdate::from_json(7, payload).unwrap();
        assert_eq!(update.malformed(), 2);
        assert_eq!(
            update.targets(),
            &[RawTarget::new("keep", "", 10.0), RawTarget::new("also-kept", "", 0.0).with_rank(2)]
        );
    }

    #[test]
    fn whole_payload_rejected() {
        let err = RatesUpdate::from_json(12, b"not json").unwrap_err();
        assert!(matches!(err, UpdateError::ConfigParse { version: 12, .. }));

        let err = RatesUpdate::from_json(13, br#"{ "target_tps": 5 }"#).unwrap_err();
        assert!(matches!(err, UpdateError::ConfigParse { version: 13, .. }));
    }

    #[test]
    fn versioned_payload() {
        let update = RatesUpdate::from_versioned_json(br#"{ "version": 35, "target_tps": [{ "service": "keep", "value": 27 }] }"#)
            .unwrap();
        assert_eq!(update.version(), 35);
        assert_eq!(update.targets(), &[RawTarget::new("keep", "", 27.0)]);
    }

    #[test]
    fn versioned_payload_rejection_keeps_version() {
        let err = RatesUpdate::from_versioned_json(br#"{ "version": 9, "target_tps": "all" }"#).unwrap_err();
        assert!(matches!(err, UpdateError::ConfigParse { version: 9, .. }));

        let err = RatesUpdate::from_versioned_json(b"{ not json").unwrap_err();
        assert!(matches!(err, UpdateError::ConfigParse { version: 0, .. }));
    }

    #[test]
    fn empty_payload() {
        let update = RatesUpdate::from_json(1, b"{}").unwrap();
        assert!(update.targets().is_empty());
    }
}
