use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use crate::config::{UploadContext, DEFAULT_PROGRESS_STEP};
use crate::error::{AppError, AppResult};
use crate::network::transport::{ChunkRequest, ChunkTransport, ProgressCallback};
use crate::protocol::messages::{ServerResponse, HEADER_CSRF_TOKEN, HEADER_FILE_ID};

/// Sends chunks as `multipart/form-data` POSTs with the metadata in headers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    progress_step: usize,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }

    /// Body slice size; each slice handed to the client is one progress tick.
    pub fn with_progress_step(mut self, step: usize) -> Self {
        self.progress_step = step.max(1);
        self
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ChunkTransport for HttpTransport {
    fn send_chunk(
        &self,
        request: ChunkRequest,
        progress: ProgressCallback,
    ) -> Pin<Box<dyn Future<Output = AppResult<ServerResponse>> + Send + '_>> {
        Box::pin(async move {
            let ChunkRequest {
                target_url,
                metadata,
                data,
            } = request;

            let total = data.len() as u64;
            let stream = progress_stream(data, self.progress_step, progress);
            let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
                .file_name(metadata.file_name.clone());
            let form = Form::new()
                .text("action", metadata.action.as_form_value())
                .part("file", part);

            let mut builder = self.client.post(&target_url).multipart(form);
            for (name, value) in metadata.headers() {
                builder = builder.header(name, value);
            }

            debug!(
                "http: POST {target_url} [{}, {}) eof={}",
                metadata.range.from, metadata.range.to, metadata.range.is_last
            );
            let response = builder
                .send()
                .await
                .map_err(|e| AppError::Transport(format!("failed to send chunk: {e}")))?;

            read_response(response).await
        })
    }

    fn delete(
        &self,
        target_url: String,
        context: UploadContext,
    ) -> Pin<Box<dyn Future<Output = AppResult<ServerResponse>> + Send + '_>> {
        Box::pin(async move {
            let mut builder = self.client.delete(&target_url);
            if let Some(token) = &context.csrf_token {
                builder = builder.header(HEADER_CSRF_TOKEN, token.as_str());
            }
            if let Some(id) = &context.file_id {
                builder = builder.header(HEADER_FILE_ID, id.as_str());
            }

            debug!("http: DELETE {target_url}");
            let response = builder
                .send()
                .await
                .map_err(|e| AppError::Transport(format!("failed to send delete: {e}")))?;

            read_response(response).await
        })
    }
}

/// Turns a reply into the server message or the matching error.
async fn read_response(response: reqwest::Response) -> AppResult<ServerResponse> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| AppError::Transport(format!("failed to read response: {e}")))?;

    if !status.is_success() {
        warn!("http: server answered {status}");
        let reason = status.canonical_reason().unwrap_or("request failed");
        return Err(ServerResponse::rejection(&body, reason));
    }

    if body.is_empty() {
        return Ok(ServerResponse::default());
    }
    ServerResponse::parse(&body)
}

/// Splits `data` into `step`-sized slices, reporting cumulative progress as
/// each slice is pulled by the HTTP client.
fn progress_stream(
    data: Bytes,
    step: usize,
    progress: ProgressCallback,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len() as u64;
    let step = step.max(1);
    let slices: Vec<Bytes> = (0..data.len())
        .step_by(step)
        .map(|start| data.slice(start..(start + step).min(data.len())))
        .collect();

    let mut loaded = 0u64;
    stream::iter(slices.into_iter().map(move |slice| {
        loaded += slice.len() as u64;
        progress(loaded, total);
        Ok(slice)
    }))
}
