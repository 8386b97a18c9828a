use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::checksum::Checksum;
use crate::error::AppError;
use crate::protocol::chunker::ChunkRange;

pub const HEADER_CSRF_TOKEN: &str = "X-CSRFToken";
pub const HEADER_FILE_ID: &str = "X-File-ID";
pub const HEADER_FILE_NAME: &str = "X-File-Name";
pub const HEADER_FILE_CHECKSUM: &str = "X-File-Checksum";
pub const HEADER_CHUNK_FROM: &str = "X-File-Chunk-From";
pub const HEADER_CHUNK_SIZE: &str = "X-File-Chunk-Size";
pub const HEADER_CHUNK_TO: &str = "X-File-Chunk-To";
pub const HEADER_EOF: &str = "X-File-EOF";
pub const HEADER_FILE_SIZE: &str = "X-File-Size";
pub const HEADER_MIME_TYPE: &str = "X-File-MimeType";

/// What the server should do with the uploaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new stored file.
    #[default]
    Create,
    /// Replace the contents of an existing stored file.
    Update,
}

impl Action {
    /// Form value understood by the server.
    pub const fn as_form_value(self) -> &'static str {
        match self {
            Self::Create => "_add",
            Self::Update => "_save",
        }
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "_add" | "create" => Ok(Self::Create),
            "_save" | "update" => Ok(Self::Update),
            other => Err(AppError::Config(format!("unknown action: '{other}'"))),
        }
    }
}

/// Everything the server needs to place one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMetadata {
    pub action: Action,
    pub csrf_token: Option<String>,
    pub file_id: Option<String>,
    pub file_name: String,
    pub checksum: Checksum,
    pub range: ChunkRange,
    pub chunk_size: u64,
    pub file_size: u64,
    pub mime_type: String,
}

impl ChunkMetadata {
    /// `(name, value)` header pairs in wire order. Absent identity values are omitted.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(10);
        if let Some(token) = &self.csrf_token {
            headers.push((HEADER_CSRF_TOKEN, token.clone()));
        }
        if let Some(id) = &self.file_id {
            headers.push((HEADER_FILE_ID, id.clone()));
        }
        headers.push((HEADER_FILE_NAME, self.file_name.clone()));
        headers.push((HEADER_FILE_CHECKSUM, self.checksum.to_string()));
        headers.push((HEADER_CHUNK_FROM, self.range.from.to_string()));
        headers.push((HEADER_CHUNK_SIZE, self.chunk_size.to_string()));
        headers.push((HEADER_CHUNK_TO, self.range.to.to_string()));
        headers.push((HEADER_EOF, self.range.is_last.to_string()));
        headers.push((HEADER_FILE_SIZE, self.file_size.to_string()));
        headers.push((HEADER_MIME_TYPE, self.mime_type.clone()));
        headers
    }
}

/// JSON body the server answers every chunk (and delete) request with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    #[serde(default)]
    pub message: String,
    /// Where the stored file can be viewed; present once the last chunk lands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ServerResponse {
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::Serialization(format!("failed to decode response: {e}")))
    }

    /// Maps a rejected request to the error the session reports.
    ///
    /// `fallback` is used when the server sent no usable body, e.g. the
    /// HTTP status reason.
    pub fn rejection(body: &[u8], fallback: &str) -> AppError {
        match Self::parse(body) {
            Ok(resp) if !resp.errors.is_empty() => AppError::Validation {
                message: if resp.message.is_empty() {
                    fallback.to_string()
                } else {
                    resp.message
                },
                errors: resp.errors,
            },
            Ok(resp) if !resp.message.is_empty() => AppError::Transport(resp.message),
            _ => AppError::Transport(fallback.to_string()),
        }
    }
}
