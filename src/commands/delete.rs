use tracing::{info, warn};

use crate::config::UploadContext;
use crate::error::{AppError, AppResult};
use crate::network::transport::ChunkTransport;

/// Asks the server to delete the stored file named by `context.file_id`.
///
/// Returns the server's confirmation message.
pub async fn delete_file(
    transport: &dyn ChunkTransport,
    target_url: &str,
    context: UploadContext,
) -> AppResult<String> {
    let Some(file_id) = context.file_id.clone() else {
        return Err(AppError::Config("delete requires a file id".into()));
    };
    if target_url.trim().is_empty() {
        return Err(AppError::Config("target_url must not be empty".into()));
    }

    match transport.delete(target_url.to_string(), context).await {
        Ok(response) => {
            info!("delete: file {file_id} removed");
            Ok(response.message)
        }
        Err(e) => {
            warn!("delete: file {file_id} not removed: {e}");
            Err(e)
        }
    }
}
