use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::checksum::{ChecksumAlgorithm, DEFAULT_WINDOW_SIZE};
use crate::error::{AppError, AppResult};
use crate::protocol::chunker::DEFAULT_CHUNK_SIZE;
use crate::protocol::messages::Action;

/// Size of the body slices handed to the HTTP client; one progress tick per slice.
pub const DEFAULT_PROGRESS_STEP: usize = 64 * 1024;

/// Settings for one coordinator, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub target_url: String,
    pub chunk_size: u64,
    /// Read window used while hashing. Independent of `chunk_size`.
    pub checksum_window: u64,
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Multi-file mode. In single-file mode each `add` replaces the queue.
    pub multiple: bool,
    pub progress_step: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_window: DEFAULT_WINDOW_SIZE,
            checksum_algorithm: ChecksumAlgorithm::default(),
            multiple: false,
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }
}

impl UploadConfig {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            ..Self::default()
        }
    }

    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(|e| {
            AppError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.target_url.trim().is_empty() {
            return Err(AppError::Config("target_url must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(AppError::Config("chunk_size must be at least 1 byte".into()));
        }
        if self.checksum_window == 0 {
            return Err(AppError::Config(
                "checksum_window must be at least 1 byte".into(),
            ));
        }
        if self.progress_step == 0 {
            return Err(AppError::Config(
                "progress_step must be at least 1 byte".into(),
            ));
        }
        Ok(())
    }
}

/// Identity values supplied by the environment and forwarded verbatim on
/// every request. Never computed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadContext {
    pub csrf_token: Option<String>,
    /// Externally assigned identifier of the stored file, when updating one.
    pub file_id: Option<String>,
    #[serde(default)]
    pub action: Action,
}
