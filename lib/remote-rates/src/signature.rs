//! Service signatures.
//!
//! A signature is the stable key under which remote rate targets are declared and under which observed traffic is
//! counted. It is derived from the service name and environment only, and must hash identically across processes and
//! restarts, so it uses FNV-1a with its fixed offset basis rather than the process-seeded hasher used for maps.

use std::fmt;

const OFFSET_64: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME_64: u64 = 0x0000_0100_0000_01b3;

fn write_hash(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME_64);
    }
    hash
}

// Every field is prefixed with its length so that field boundaries can't be shifted around: ("ab", "c") and
// ("a", "bc") feed different byte streams into the hash.
fn write_field(hash: u64, field: &str) -> u64 {
    let hash = write_hash(hash, &(field.len() as u64).to_le_bytes());
    write_hash(hash, field.as_bytes())
}

/// Opaque key identifying a traffic class.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Signature(u64);

impl Signature {
    /// Creates a signature from a raw hash value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw hash value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A service name and environment pair.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ServiceSignature {
    name: String,
    env: String,
}

impl ServiceSignature {
    /// Creates a new `ServiceSignature`.
    pub fn new(name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
        }
    }

    /// Returns the service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the environment.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Computes the signature of this service.
    pub fn hash(&self) -> Signature {
        hash(&self.name, &self.env)
    }
}

impl fmt::Display for ServiceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service:{},env:{}", self.name, self.env)
    }
}

/// Computes the signature of the given service name and environment.
pub fn hash(name: &str, env: &str) -> Signature {
    let h = write_field(OFFSET_64, name);
    Signature(write_field(h, env))
}
