//! Target catalog reconciliation.
//!
//! Every update is reconciled into a fresh, immutable [`TargetCatalog`]. Competing declarations for the same signature
//! are resolved by rank: the highest rank wins, and among equal ranks the first declaration seen wins. Resolution is a
//! single fold over the entries in delivery order, so the outcome never depends on map iteration order.

use tracing::debug;

use crate::collections::FastHashMap;
use crate::signature::Signature;
use crate::update::RawTarget;

/// The target assigned to a signature.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TargetDescriptor {
    target_tps: f64,
    mechanism: u32,
    rank: u32,
}

impl TargetDescriptor {
    /// Creates a new `TargetDescriptor`.
    pub const fn new(target_tps: f64, mechanism: u32, rank: u32) -> Self {
        Self {
            target_tps,
            mechanism,
            rank,
        }
    }

    /// Returns the desired traces per second.
    pub const fn target_tps(&self) -> f64 {
        self.target_tps
    }

    /// Returns the mechanism of the rule that produced this target.
    pub const fn mechanism(&self) -> u32 {
        self.mechanism
    }

    /// Returns the rank of the declaration that produced this target.
    pub const fn rank(&self) -> u32 {
        self.rank
    }
}

/// An immutable, versioned mapping from signature to target.
#[derive(Clone, Debug, Default)]
pub struct TargetCatalog {
    version: u64,
    targets: FastHashMap<Signature, TargetDescriptor>,
}

/// Result of reconciling an update into a catalog.
#[derive(Debug)]
pub struct CatalogBuild {
    /// The reconciled catalog.
    pub catalog: TargetCatalog,

    /// Number of entries dropped as invalid.
    pub dropped: usize,

    /// Number of entries that targeted a signature already declared earlier in the same update.
    pub duplicates: usize,
}

impl TargetCatalog {
    /// Creates an empty catalog at the given version.
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            targets: FastHashMap::default(),
        }
    }

    /// Reconciles raw target declarations into a catalog.
    ///
    /// Invalid entries (empty service name, or a negative, NaN or infinite value) are dropped individually. Target
    /// values are clamped to `max_tps`.
    pub fn build(version: u64, entries: &[RawTarget], max_tps: f64) -> CatalogBuild {
        let mut dropped = 0;
        let mut duplicates = 0;

        let targets = entries
            .iter()
            .fold(FastHashMap::default(), |mut best: FastHashMap<Signature, TargetDescriptor>, entry| {
                if !is_valid(entry) {
                    debug!(
                        version,
                        service = %entry.service,
                        env = %entry.env,
                        value = entry.value,
                        "Dropping invalid remote rates entry."
                    );
                    dropped += 1;
                    return best;
                }

                let signature = entry.signature();
                let candidate = TargetDescriptor::new(clamp_tps(entry.value, max_tps), entry.mechanism, entry.rank);
                match best.get_mut(&signature) {
                    Some(current) => {
                        duplicates += 1;
                        if candidate.rank > current.rank {
                            *current = candidate;
                        }
                    }
                    None => {
                        best.insert(signature, candidate);
                    }
                }
                best
            });

        CatalogBuild {
            catalog: TargetCatalog { version, targets },
            dropped,
            duplicates,
        }
    }

    /// Returns the version of the update this catalog was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the target for the given signature, if any.
    pub fn get(&self, signature: &Signature) -> Option<&TargetDescriptor> {
        self.targets.get(signature)
    }

    /// Returns `true` if the catalog holds a target for the given signature.
    pub fn contains(&self, signature: &Signature) -> bool {
        self.targets.contains_key(signature)
    }

    /// Returns the number of targeted signatures.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if the catalog targets no signature.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn is_valid(entry: &RawTarget) -> bool {
    !entry.service.is_empty() && entry.value.is_finite() && entry.value >= 0.0
}

fn clamp_tps(value: f64, max_tps: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value.min(max_tps)
    }
}
