// Transport boundary: the session loop hands one chunk at a time to a
// `ChunkTransport` and never talks to the network itself.
//
// `HttpTransport` is the production implementation; tests script their own.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::UploadContext;
use crate::error::AppResult;
use crate::protocol::messages::{ChunkMetadata, ServerResponse};

/// Invoked with `(bytes_loaded, bytes_total)` for the chunk in flight.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One chunk request: where to send it, how to label it, and its bytes.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub target_url: String,
    pub metadata: ChunkMetadata,
    pub data: Bytes,
}

/// Performs the network request for a single chunk.
pub trait ChunkTransport: Send + Sync {
    /// Sends one chunk and resolves once the server has answered.
    ///
    /// A rejected chunk resolves to `AppError::Transport` or
    /// `AppError::Validation`; it is never retried here.
    fn send_chunk(
        &self,
        request: ChunkRequest,
        progress: ProgressCallback,
    ) -> Pin<Box<dyn Future<Output = AppResult<ServerResponse>> + Send + '_>>;

    /// Deletes the stored file identified by `context.file_id`.
    fn delete(
        &self,
        target_url: String,
        context: UploadContext,
    ) -> Pin<Box<dyn Future<Output = AppResult<ServerResponse>> + Send + '_>>;
}
