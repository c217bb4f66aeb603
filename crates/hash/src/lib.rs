#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Checksum verification for fetchup
//!
//! Digests are computed by streaming files in fixed-size chunks, never by
//! loading them whole. SHA-256 is the default algorithm because release
//! manifests publish it; BLAKE3 is accepted when a checksum says so.

mod tree;

pub use tree::digest_tree;

use fetchup_errors::{Error, NetworkError, StorageError};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Size of chunks for streaming hash computation
const CHUNK_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 32,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(StorageError::CorruptedData {
                message: format!("unknown hash algorithm: {other}"),
            }
            .into()),
        }
    }
}

/// Incremental hasher over either algorithm
pub(crate) enum Hasher {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub(crate) fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub(crate) fn finalize(self) -> Hash {
        match self {
            Self::Sha256(h) => Hash {
                algorithm: HashAlgorithm::Sha256,
                bytes: h.finalize().to_vec(),
            },
            Self::Blake3(h) => Hash {
                algorithm: HashAlgorithm::Blake3,
                bytes: h.finalize().as_bytes().to_vec(),
            },
        }
    }
}

/// A content digest tagged with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl Hash {
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Convert to hex string (without algorithm prefix)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Parse `algorithm:hex` or bare hex (SHA-256)
    ///
    /// # Errors
    /// Returns an error if the algorithm is unknown, the hex is invalid, or
    /// the digest has the wrong length.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let (algorithm, hex_part) = match s.split_once(':') {
            Some((algo, rest)) => (algo.parse()?, rest),
            None => (HashAlgorithm::Sha256, s),
        };
        let bytes = hex::decode(hex_part).map_err(|e| StorageError::CorruptedData {
            message: format!("invalid hex: {e}"),
        })?;
        if bytes.len() != algorithm.digest_len() {
            return Err(StorageError::CorruptedData {
                message: format!(
                    "{} digest must be {} bytes, got {}",
                    algorithm.as_str(),
                    algorithm.digest_len(),
                    bytes.len()
                ),
            }
            .into());
        }
        Ok(Self { algorithm, bytes })
    }

    /// Compute hash of a byte slice
    #[must_use]
    pub fn from_data(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// Compute hash of a file, streaming it in chunks
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<Self, Error> {
        let mut file = File::open(path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;

        let mut hasher = Hasher::new(algorithm);
        let mut buffer = vec![0; CHUNK_SIZE];

        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| Error::io_with_path(&e, path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finalize())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Digest a file with the default algorithm
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn digest(path: &Path) -> Result<Hash, Error> {
    Hash::hash_file(path, HashAlgorithm::default()).await
}

/// Verify a file matches an expected hash
///
/// # Errors
/// Returns an error if the file cannot be read or hashed.
pub async fn verify(path: &Path, expected: &Hash) -> Result<bool, Error> {
    let actual = Hash::hash_file(path, expected.algorithm()).await?;
    Ok(actual == *expected)
}

/// Verify a file against a checksum string
///
/// A checksum that cannot be parsed can never match, so it is reported as a
/// mismatch rather than a parse failure.
///
/// # Errors
/// Returns `NetworkError::ChecksumMismatch` if the digests differ, or an I/O
/// error if the file cannot be read.
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<Hash, Error> {
    let algorithm = match Hash::from_hex(expected) {
        Ok(hash) => hash.algorithm(),
        Err(_) => expected
            .split_once(':')
            .and_then(|(algo, _)| algo.parse().ok())
            .unwrap_or_default(),
    };
    let actual = Hash::hash_file(path, algorithm).await?;
    match Hash::from_hex(expected) {
        Ok(parsed) if parsed == actual => Ok(actual),
        _ => Err(NetworkError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into()),
    }
}
