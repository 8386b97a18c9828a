use thiserror::Error;

use crate::crypto::checksum::Checksum;

#[derive(Error, Debug)]
pub enum AppError {
    /// A window could not be read while hashing. Fatal to that file.
    #[error("Failed to read file while hashing: {0}")]
    IoRead(String),

    /// A chunk could not be read while uploading. Fatal to that file.
    #[error("Failed to read {name} at offset {offset}: {message}")]
    ChunkRead {
        name: String,
        offset: u64,
        message: String,
    },

    #[error("File is already queued: {0}")]
    Duplicate(Checksum),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The server rejected the chunk with a list of field errors.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: Vec<String>,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Upload task failed: {0}")]
    Join(String),
}

impl AppError {
    /// The message shown next to the failed file: the server's own wording
    /// when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Transport(message) => message.clone(),
            AppError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Messages suitable for the presentation layer's error list.
    pub fn messages(&self) -> Vec<String> {
        match self {
            AppError::Validation { errors, .. } if !errors.is_empty() => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
