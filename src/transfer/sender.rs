// Sender pipeline: drives one queued session through the transport, one
// chunk at a time. Chunk N+1 is only read once chunk N has been confirmed.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use crate::config::UploadContext;
use crate::crypto::checksum::Checksum;
use crate::error::{AppError, AppResult};
use crate::network::transport::{ChunkRequest, ChunkTransport, ProgressCallback};
use crate::protocol::chunker::ChunkPlan;
use crate::protocol::messages::ChunkMetadata;
use crate::transfer::progress::{EventSender, ProgressEvent, ProgressTracker, Severity};
use crate::transfer::session::{UploadSession, UploadState};

/// Status line for a confirmed chunk when the server sent no message.
const CHUNK_ACCEPTED: &str = "Uploading file, please wait a moment.";
/// Status line for the final chunk when the server sent no message.
const UPLOAD_COMPLETED: &str = "File upload is completed.";

/// Where and how a session uploads.
#[derive(Debug, Clone)]
pub struct SendSettings {
    pub target_url: String,
    pub chunk_size: u64,
    pub context: UploadContext,
}

/// Uploads every chunk of `session` and records the terminal state.
///
/// The session must already be `Uploading`. Returns the server's result URL
/// on success. A failed chunk ends the upload; nothing is retried and the
/// confirmed cursor is discarded.
pub async fn run_send(
    session: Arc<UploadSession>,
    transport: Arc<dyn ChunkTransport>,
    settings: SendSettings,
    events: EventSender,
) -> AppResult<Option<String>> {
    let checksum = session
        .checksum()
        .cloned()
        .ok_or_else(|| AppError::InvalidTransition {
            from: session.state().name(),
            to: "Uploading",
        })?;

    let name = session.record().name.clone();
    info!(
        "session {}: uploading '{name}' ({} bytes in {} chunk(s))",
        session.id,
        session.record().size,
        ChunkPlan::new(session.record().size, settings.chunk_size).chunk_count()
    );

    match send_chunks(&session, transport.as_ref(), &settings, &checksum, &events).await {
        Ok(url) => {
            session.set_state(UploadState::Succeeded { url: url.clone() })?;
            info!("session {}: '{name}' uploaded", session.id);
            events
                .send(ProgressEvent::Completed {
                    checksum: checksum.clone(),
                    url: url.clone(),
                })
                .ok();
            Ok(url)
        }
        Err(e) => {
            error!("session {}: '{name}' failed: {e}", session.id);
            session.set_state(UploadState::Failed {
                message: e.user_message(),
            })?;
            report_failure(&checksum, &name, &e, &events);
            Err(e)
        }
    }
}

async fn send_chunks(
    session: &Arc<UploadSession>,
    transport: &dyn ChunkTransport,
    settings: &SendSettings,
    checksum: &Checksum,
    events: &EventSender,
) -> AppResult<Option<String>> {
    let source = session.source();
    let file_size = source.size();
    let tracker = Arc::new(Mutex::new(ProgressTracker::new(
        file_size,
        settings.chunk_size,
    )));

    for range in ChunkPlan::new(file_size, settings.chunk_size) {
        let data = source
            .read_range(range.from, range.to)
            .await
            .map_err(|e| AppError::ChunkRead {
                name: source.name().to_string(),
                offset: range.from,
                message: e.to_string(),
            })?;

        tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .begin_chunk(range.from);

        let request = ChunkRequest {
            target_url: settings.target_url.clone(),
            metadata: ChunkMetadata {
                action: settings.context.action,
                csrf_token: settings.context.csrf_token.clone(),
                file_id: settings.context.file_id.clone(),
                file_name: source.name().to_string(),
                checksum: checksum.clone(),
                range,
                chunk_size: settings.chunk_size,
                file_size,
                mime_type: source.mime_type().to_string(),
            },
            data,
        };

        let progress = progress_callback(session, &tracker, checksum, events);
        let response = transport.send_chunk(request, progress).await?;

        let snapshot = tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .confirm(range.to);
        session.update_percent(snapshot.percent);
        events.send(ProgressEvent::progress(checksum, snapshot)).ok();

        let (fallback, severity) = if range.is_last {
            (UPLOAD_COMPLETED, Severity::Success)
        } else {
            (CHUNK_ACCEPTED, Severity::Warning)
        };
        let message = if response.message.is_empty() {
            fallback.to_string()
        } else {
            response.message
        };
        events
            .send(ProgressEvent::status(checksum, message, severity))
            .ok();

        if range.is_last {
            return Ok(response.url);
        }
    }

    // The plan always ends with a final range.
    Ok(None)
}

fn progress_callback(
    session: &Arc<UploadSession>,
    tracker: &Arc<Mutex<ProgressTracker>>,
    checksum: &Checksum,
    events: &EventSender,
) -> ProgressCallback {
    let session = Arc::clone(session);
    let tracker = Arc::clone(tracker);
    let checksum = checksum.clone();
    let events = events.clone();

    Arc::new(move |loaded: u64, total: u64| {
        let snapshot = tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(loaded, total);
        session.update_percent(snapshot.percent);
        events.send(ProgressEvent::progress(&checksum, snapshot)).ok();
    })
}

fn report_failure(checksum: &Checksum, name: &str, err: &AppError, events: &EventSender) {
    if let AppError::Validation { errors, .. } = err {
        if !errors.is_empty() {
            events
                .send(ProgressEvent::Error {
                    messages: err.messages(),
                })
                .ok();
        }
    }
    events
        .send(ProgressEvent::status(checksum, err.user_message(), Severity::Danger))
        .ok();
    events
        .send(ProgressEvent::Notify {
            severity: Severity::Danger,
            message: format!("Failed to upload file: {name}."),
        })
        .ok();
    events
        .send(ProgressEvent::Progress {
            checksum: checksum.clone(),
            percent: 100,
            bytes_sent: 0,
            bytes_total: 0,
            speed_bps: 0,
            eta_seconds: 0,
            failed: true,
        })
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::checksum::ChecksumAlgorithm;
    use crate::network::transport::testing::MockTransport;
    use crate::transfer::source::MemoryFile;
    use tokio::sync::mpsc;

    async fn uploading_session(data: &[u8], events: &EventSender) -> Arc<UploadSession> {
        let source = MemoryFile::new("a.txt", "text/plain", data.to_vec());
        let mut session = UploadSession::new(Arc::new(source));
        session
            .hash(4, ChecksumAlgorithm::Md5, events)
            .await
            .unwrap();
        session
            .set_state(UploadState::Uploading { percent: 0 })
            .unwrap();
        Arc::new(session)
    }

    fn settings(chunk_size: u64) -> SendSettings {
        SendSettings {
            target_url: "http://localhost/upload/".into(),
            chunk_size,
            context: UploadContext::default(),
        }
    }

    #[tokio::test]
    async fn test_empty_replies_fall_back_to_default_status() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = uploading_session(b"0123456789", &tx).await;
        let transport = Arc::new(MockTransport::new().with_empty_replies());

        let url = run_send(session.clone(), transport, settings(4), tx)
            .await
            .unwrap();
        assert_eq!(url, None);
        assert_eq!(session.state(), UploadState::Succeeded { url: None });

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Status {
                message, severity, ..
            } = event
            {
                statuses.push((message, severity));
            }
        }
        assert_eq!(
            statuses,
            vec![
                (CHUNK_ACCEPTED.to_string(), Severity::Warning),
                (CHUNK_ACCEPTED.to_string(), Severity::Warning),
                (UPLOAD_COMPLETED.to_string(), Severity::Success),
            ]
        );
    }
}
