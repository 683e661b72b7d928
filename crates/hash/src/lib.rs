#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! BLAKE3 content addressing for kiln
//!
//! Build fingerprints, archive checksums and the cache directory layout all
//! reduce to the 32-byte [`Hash`] defined here.

mod file_hasher;
mod fingerprint;

pub use file_hasher::{hash_directory, hash_files};
pub use fingerprint::{Fingerprint, FingerprintBuilder};

use kiln_errors::{CacheError, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const READ_BUFFER: usize = 64 * 1024;

/// A BLAKE3 digest, printed and serialized as lowercase hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex digits, in either case
    ///
    /// # Errors
    /// Returns `CacheError::InvalidFingerprint` for anything else.
    pub fn from_hex(input: &str) -> Result<Self, Error> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(input, &mut bytes).map_err(|e| CacheError::InvalidFingerprint {
            input: format!("{input}: {e}"),
        })?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Stream a file through the hasher
    ///
    /// # Errors
    /// Returns an I/O error carrying the path if the file cannot be read.
    pub async fn hash_file(path: &Path) -> Result<Self, Error> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0; READ_BUFFER];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|e| Error::io_with_path(&e, path))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(*hasher.finalize().as_bytes()))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Check a downloaded file against the digest a recipe pins
///
/// # Errors
/// Returns an error if the file cannot be read. A mismatch is `Ok(Err(actual))`.
pub async fn verify_file(path: &Path, expected: &Hash) -> Result<Result<(), Hash>, Error> {
    let actual = Hash::hash_file(path).await?;
    Ok(if actual == *expected { Ok(()) } else { Err(actual) })
}

/// Cache location of a digest: a two-character shard directory, then the rest
#[must_use]
pub fn content_path(hash: &Hash) -> PathBuf {
    let hex = hash.to_hex();
    let (shard, rest) = hex.split_at(2);
    Path::new(shard).join(rest)
}
