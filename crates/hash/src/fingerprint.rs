//! Build fingerprints
//!
//! A fingerprint is a BLAKE3 digest over a canonical encoding of every input
//! that can change a build's output. Fields are written as length-prefixed
//! key/value pairs so that no two distinct field sequences share an encoding.

use crate::Hash;
use blake3::Hasher;
use kiln_errors::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const DOMAIN: &[u8] = b"kiln-fingerprint-v1";

/// Cache key identifying one buildable artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Hash);

impl Fingerprint {
    #[must_use]
    pub fn hash(&self) -> &Hash {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// First characters of the hex digest, for log lines and reports
    #[must_use]
    pub fn short(&self) -> String {
        self.0.to_hex()[..12].to_string()
    }

    /// Parse a full hex digest
    ///
    /// # Errors
    /// Returns an error if the input is not a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        Hash::from_hex(s).map(Self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental, order-sensitive fingerprint encoder
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    hasher: Hasher,
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintBuilder {
    #[must_use]
    pub fn new() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(DOMAIN);
        Self { hasher }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Add a named string field
    #[must_use]
    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.write(key.as_bytes());
        self.write(value.as_bytes());
        self
    }

    /// Add a named digest field
    #[must_use]
    pub fn digest(mut self, key: &str, value: &Hash) -> Self {
        self.write(key.as_bytes());
        self.write(value.as_bytes());
        self
    }

    /// Add a sorted map under a common prefix; the entry count is encoded
    /// so an empty map differs from an absent one
    #[must_use]
    pub fn map(mut self, prefix: &str, values: &BTreeMap<String, String>) -> Self {
        self.write(prefix.as_bytes());
        self.write(&(values.len() as u64).to_le_bytes());
        for (key, value) in values {
            self.write(key.as_bytes());
            self.write(value.as_bytes());
        }
        self
    }

    #[must_use]
    pub fn finish(self) -> Fingerprint {
        Fingerprint(Hash::from_bytes(*self.hasher.finalize().as_bytes()))
    }
}
