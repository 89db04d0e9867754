//! Collection type aliases.

/// [`BuildHasher`][std::hash::BuildHasher] used by the crate's hash maps.
///
/// Process-seeded, so it must never be used to derive values compared across processes. See
/// [`signature`][crate::signature] for the stable hash.
pub type FastBuildHasher = foldhash::quality::RandomState;

/// A hash map based on `hashbrown` using [`FastBuildHasher`].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;
