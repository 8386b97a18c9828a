use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::transfer::source::FileSource;

/// Default hashing window: 2 MiB.
pub const DEFAULT_WINDOW_SIZE: u64 = 2 * 1024 * 1024;

/// Hash used to identify file contents.
///
/// Both are block-accumulation hashes, so how the input is split into
/// windows never changes the digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// What the upload server verifies after the final chunk.
    #[default]
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(AppError::Config(format!(
                "unknown checksum algorithm: '{other}'"
            ))),
        }
    }
}

/// Hex-encoded content digest. Once computed for a file it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streaming checksum calculator.
/// Feed it data incrementally, finalize when done.
pub enum StreamingChecksum {
    Md5(Md5),
    Sha256(Sha256),
}

impl StreamingChecksum {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            Self::Md5(h) => Checksum::from_bytes(&h.finalize()),
            Self::Sha256(h) => Checksum::from_bytes(&h.finalize()),
        }
    }
}

impl Default for StreamingChecksum {
    fn default() -> Self {
        Self::new(ChecksumAlgorithm::default())
    }
}

/// Hash a whole source, reading one window at a time.
///
/// Only one window buffer is alive at any point. A failed or short read
/// abandons the computation; no partial digest is returned.
pub async fn compute_checksum(
    source: &dyn FileSource,
    window_size: u64,
    algorithm: ChecksumAlgorithm,
) -> AppResult<Checksum> {
    let window_size = window_size.max(1);
    let size = source.size();
    let windows = size.div_ceil(window_size);
    let mut checksum = StreamingChecksum::new(algorithm);

    let mut offset = 0u64;
    let mut index = 0u64;
    while offset < size {
        let end = offset.saturating_add(window_size).min(size);
        let data = source
            .read_range(offset, end)
            .await
            .map_err(|e| AppError::IoRead(format!("{}: {e}", source.name())))?;

        if data.len() as u64 != end - offset {
            return Err(AppError::IoRead(format!(
                "{}: short read at offset {offset} ({} of {} bytes)",
                source.name(),
                data.len(),
                end - offset
            )));
        }

        index += 1;
        debug!(
            "checksum: read window {index} of {windows} for '{}'",
            source.name()
        );
        checksum.update(&data);
        offset = end;
    }

    Ok(checksum.finalize())
}
