use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{UploadConfig, UploadContext};
use crate::crypto::checksum::Checksum;
use crate::error::{AppError, AppResult};
use crate::network::transport::ChunkTransport;
use crate::transfer::progress::{EventSender, ProgressEvent, Severity};
use crate::transfer::sender::{run_send, SendSettings};
use crate::transfer::session::{FileRecord, UploadSession, UploadState};
use crate::transfer::source::{FileSource, LocalFile};

/// Owns the queued files and starts one session per file.
///
/// Every mutation runs to completion before returning, so the queue needs no
/// lock as long as the coordinator itself is owned by one task.
pub struct UploadCoordinator {
    config: UploadConfig,
    context: UploadContext,
    transport: Arc<dyn ChunkTransport>,
    events: EventSender,
    sessions: Vec<Arc<UploadSession>>,
}

impl UploadCoordinator {
    pub fn new(
        config: UploadConfig,
        context: UploadContext,
        transport: Arc<dyn ChunkTransport>,
        events: EventSender,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            context,
            transport,
            events,
            sessions: Vec::new(),
        })
    }

    /// Hashes `source` right away and queues it unless an identical file is
    /// already queued.
    ///
    /// In single-file mode the queue is cleared first.
    pub async fn add(&mut self, source: Arc<dyn FileSource>) -> AppResult<FileRecord> {
        if !self.config.multiple {
            self.clear_all();
        }

        let mut session = UploadSession::new(source);
        let checksum = session
            .hash(
                self.config.checksum_window,
                self.config.checksum_algorithm,
                &self.events,
            )
            .await?;

        let record = session.record().clone();
        if self.find(&checksum).is_some() {
            warn!("coordinator: '{}' is already queued ({checksum})", record.name);
            self.events
                .send(ProgressEvent::Notify {
                    severity: Severity::Danger,
                    message: format!("File: {} is already exists.", record.name),
                })
                .ok();
            return Err(AppError::Duplicate(checksum));
        }

        info!("coordinator: queued '{}' ({checksum})", record.name);
        self.sessions.push(Arc::new(session));
        Ok(record)
    }

    /// Opens a local file and [`add`](Self::add)s it.
    pub async fn add_path(&mut self, path: &Path) -> AppResult<FileRecord> {
        let file = LocalFile::open(path).await?;
        self.add(Arc::new(file)).await
    }

    /// Drops the file with `checksum`. A file that is uploading is left alone.
    ///
    /// Returns whether a file was removed.
    pub fn remove_by_checksum(&mut self, checksum: &Checksum) -> bool {
        let Some(index) = self
            .sessions
            .iter()
            .position(|s| s.checksum() == Some(checksum))
        else {
            return false;
        };

        if self.sessions[index].is_uploading() {
            warn!("coordinator: not removing {checksum} while it uploads");
            return false;
        }
        self.sessions.remove(index);
        true
    }

    /// Drops every file that is not currently uploading.
    pub fn clear_all(&mut self) {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.is_uploading());
        if before != self.sessions.len() {
            info!(
                "coordinator: cleared {} file(s)",
                before - self.sessions.len()
            );
        }
    }

    /// Starts every queued file. Files upload concurrently; each file's own
    /// chunks go strictly in order.
    pub fn start_all(&self) -> UploadBatch {
        let mut tasks = JoinSet::new();
        let settings = SendSettings {
            target_url: self.config.target_url.clone(),
            chunk_size: self.config.chunk_size,
            context: self.context.clone(),
        };

        for session in &self.sessions {
            if session.state() != UploadState::Queued {
                continue;
            }
            let Some(checksum) = session.checksum().cloned() else {
                continue;
            };
            // Claim the session now so a second start_all skips it.
            if let Err(e) = session.set_state(UploadState::Uploading { percent: 0 }) {
                warn!("coordinator: cannot start '{}': {e}", session.record().name);
                continue;
            }

            info!("coordinator: start upload '{}'", session.record().name);
            self.events
                .send(ProgressEvent::status(
                    &checksum,
                    "Starting to upload...",
                    Severity::Warning,
                ))
                .ok();

            let session = Arc::clone(session);
            let transport = Arc::clone(&self.transport);
            let settings = settings.clone();
            let events = self.events.clone();
            tasks.spawn(async move {
                let name = session.record().name.clone();
                let result = run_send(session, transport, settings, events).await;
                FileOutcome {
                    name,
                    checksum,
                    result,
                }
            });
        }

        UploadBatch { tasks }
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.sessions.iter().map(|s| s.record().clone()).collect()
    }

    /// Current state of every file, in queue order.
    pub fn states(&self) -> Vec<(FileRecord, UploadState)> {
        self.sessions
            .iter()
            .map(|s| (s.record().clone(), s.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn find(&self, checksum: &Checksum) -> Option<&Arc<UploadSession>> {
        self.sessions
            .iter()
            .find(|s| s.checksum() == Some(checksum))
    }
}

/// Result of one file's upload.
#[derive(Debug)]
pub struct FileOutcome {
    pub name: String,
    pub checksum: Checksum,
    /// The server's result URL, or why the file failed.
    pub result: AppResult<Option<String>>,
}

/// Handle on the sessions started by one [`UploadCoordinator::start_all`].
pub struct UploadBatch {
    tasks: JoinSet<FileOutcome>,
}

impl UploadBatch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every file. One file failing never stops the others.
    pub async fn wait(mut self) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("coordinator: upload task ended abnormally: {e}"),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::testing::MockTransport;
    use crate::transfer::source::MemoryFile;
    use tokio::sync::mpsc;

    fn config(multiple: bool, chunk_size: u64) -> UploadConfig {
        UploadConfig {
            multiple,
            chunk_size,
            checksum_window: 3,
            ..UploadConfig::new("http://localhost/upload/")
        }
    }

    fn file(name: &str, data: &[u8]) -> Arc<dyn FileSource> {
        Arc::new(MemoryFile::new(name, "text/plain", data.to_vec()))
    }

    fn coordinator(
        multiple: bool,
        chunk_size: u64,
        transport: Arc<MockTransport>,
    ) -> (UploadCoordinator, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = UploadCoordinator::new(
            config(multiple, chunk_size),
            UploadContext {
                csrf_token: Some("csrf".into()),
                file_id: Some("42".into()),
                ..UploadContext::default()
            },
            transport,
            tx,
        )
        .unwrap();
        (coordinator, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected_in_multi_file_mode() {
        let (mut c, _rx) = coordinator(true, 4, Arc::new(MockTransport::new()));

        let first = c.add(file("a.txt", b"same bytes")).await.unwrap();
        assert!(first.checksum.is_some());

        let err = c.add(file("copy-of-a.txt", b"same bytes")).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(ref cs) if Some(cs) == first.checksum.as_ref()));
        assert_eq!(c.len(), 1);

        c.add(file("b.txt", b"other bytes")).await.unwrap();
        assert_eq!(c.len(), 2);
    }

    #[tokio::test]
    async fn test_single_file_mode_replaces_queue() {
        let (mut c, _rx) = coordinator(false, 4, Arc::new(MockTransport::new()));
        c.add(file("a.txt", b"aaa")).await.unwrap();
        c.add(file("b.txt", b"bbb")).await.unwrap();

        let records = c.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "b.txt");
    }

    #[tokio::test]
    async fn test_hash_failure_is_not_queued() {
        let (mut c, _rx) = coordinator(true, 4, Arc::new(MockTransport::new()));
        let broken = MemoryFile::new("broken", "text/plain", vec![0u8; 10]).failing_from(0);
        let err = c.add(Arc::new(broken)).await.unwrap_err();
        assert!(matches!(err, AppError::IoRead(_)));
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (mut c, _rx) = coordinator(true, 4, Arc::new(MockTransport::new()));
        let a = c.add(file("a.txt", b"aaa")).await.unwrap();
        c.add(file("b.txt", b"bbb")).await.unwrap();

        assert!(c.remove_by_checksum(a.checksum.as_ref().unwrap()));
        assert!(!c.remove_by_checksum(a.checksum.as_ref().unwrap()));
        assert_eq!(c.len(), 1);

        c.clear_all();
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_upload_sends_ordered_partition_with_metadata() {
        let transport = Arc::new(MockTransport::new());
        let (mut c, mut rx) = coordinator(true, 4, transport.clone());
        let record = c.add(file("notes.txt", b"0123456789")).await.unwrap();

        let outcomes = c.start_all().wait().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].result.as_ref().unwrap().as_deref(),
            Some("/media/notes.txt")
        );

        let sent = transport.requests_for("notes.txt");
        let ranges: Vec<(u64, u64, bool)> = sent
            .iter()
            .map(|m| (m.range.from, m.range.to, m.range.is_last))
            .collect();
        assert_eq!(ranges, vec![(0, 4, false), (4, 8, false), (8, 10, true)]);
        for meta in &sent {
            assert_eq!(Some(&meta.checksum), record.checksum.as_ref());
            assert_eq!(meta.file_size, 10);
            assert_eq!(meta.chunk_size, 4);
            assert_eq!(meta.mime_type, "text/plain");
            assert_eq!(meta.csrf_token.as_deref(), Some("csrf"));
            assert_eq!(meta.file_id.as_deref(), Some("42"));
        }

        let payloads = transport.payloads.lock().unwrap().concat();
        assert_eq!(payloads, b"0123456789");

        assert_eq!(
            c.states()[0].1,
            UploadState::Succeeded {
                url: Some("/media/notes.txt".into())
            }
        );

        let events = drain(&mut rx);
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Status { severity: Severity::Success, message, .. }
                if message == "File upload is completed."
        )));
    }

    #[tokio::test]
    async fn test_failed_chunk_halts_only_that_file() {
        let transport = Arc::new(MockTransport::new().fail_at("bad.txt", 4, &[]));
        let (mut c, mut rx) = coordinator(true, 4, transport.clone());
        c.add(file("bad.txt", b"0123456789")).await.unwrap();
        c.add(file("good.txt", b"abcdefghij")).await.unwrap();

        let outcomes = c.start_all().wait().await;
        assert_eq!(outcomes.len(), 2);

        let bad = outcomes.iter().find(|o| o.name == "bad.txt").unwrap();
        assert!(matches!(bad.result, Err(AppError::Transport(_))));
        let good = outcomes.iter().find(|o| o.name == "good.txt").unwrap();
        assert!(good.result.is_ok());

        // Chunk k = [4, 8) failed: chunk k+1 is never sent.
        let bad_ranges: Vec<u64> = transport
            .requests_for("bad.txt")
            .iter()
            .map(|m| m.range.from)
            .collect();
        assert_eq!(bad_ranges, vec![0, 4]);
        assert_eq!(transport.requests_for("good.txt").len(), 3);

        let states = c.states();
        assert!(states
            .iter()
            .any(|(r, s)| r.name == "bad.txt" && matches!(s, UploadState::Failed { .. })));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Notify { severity: Severity::Danger, message }
                if message == "Failed to upload file: bad.txt."
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Progress { failed: true, percent: 100, .. })));
    }

    #[tokio::test]
    async fn test_validation_errors_surface_verbatim() {
        let transport = Arc::new(MockTransport::new().fail_at("form.txt", 0, &["name: required"]));
        let (mut c, mut rx) = coordinator(true, 4, transport);
        c.add(file("form.txt", b"xyz")).await.unwrap();

        let outcomes = c.start_all().wait().await;
        assert!(matches!(outcomes[0].result, Err(AppError::Validation { .. })));

        let events = drain(&mut rx);
        assert!(events.contains(&ProgressEvent::Error {
            messages: vec!["name: required".into()]
        }));
    }

    #[tokio::test]
    async fn test_zero_byte_file_completes() {
        let transport = Arc::new(MockTransport::new());
        let (mut c, _rx) = coordinator(true, 4, transport.clone());
        c.add(file("empty.txt", b"")).await.unwrap();

        let outcomes = c.start_all().wait().await;
        assert!(outcomes[0].result.is_ok());

        let sent = transport.requests_for("empty.txt");
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].range.from, sent[0].range.to, sent[0].range.is_last), (0, 0, true));
    }

    #[tokio::test]
    async fn test_start_all_only_starts_queued_files_once() {
        let transport = Arc::new(MockTransport::new());
        let (mut c, _rx) = coordinator(true, 4, transport.clone());
        c.add(file("a.txt", b"abc")).await.unwrap();

        let first = c.start_all();
        let second = c.start_all();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        first.wait().await;
        assert!(c.start_all().is_empty());
        assert_eq!(transport.requests_for("a.txt").len(), 1);
    }

    #[tokio::test]
    async fn test_uploading_file_survives_remove_clear_and_replace() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let transport = Arc::new(MockTransport::new().gated(gate.clone()));
        let (mut c, _rx) = coordinator(false, 4, transport.clone());
        let a = c.add(file("a.txt", b"0123456789")).await.unwrap();
        let a_checksum = a.checksum.clone().unwrap();

        let batch = c.start_all();
        assert!(!c.remove_by_checksum(&a_checksum));

        // Single-file mode clears the queue first, but a.txt is uploading.
        c.add(file("b.txt", b"replacement")).await.unwrap();
        let names: Vec<String> = c.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        c.clear_all();
        assert_eq!(c.len(), 1);
        assert!(matches!(c.states()[0].1, UploadState::Uploading { .. }));

        gate.add_permits(16);
        let outcomes = batch.wait().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert!(transport.requests_for("b.txt").is_empty());

        // Finished files can be cleared.
        c.clear_all();
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_file_shrinking_after_add_fails_with_chunk_offset() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("shrinks.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let transport = Arc::new(MockTransport::new());
        let (mut c, mut rx) = coordinator(true, 4, transport.clone());
        c.add_path(&path).await.unwrap();
        std::fs::write(&path, b"0123").unwrap();

        let outcomes = c.start_all().wait().await;
        match &outcomes[0].result {
            Err(AppError::ChunkRead { name, offset, .. }) => {
                assert_eq!(name, "shrinks.txt");
                assert_eq!(*offset, 4);
            }
            other => panic!("expected a chunk read error, got {other:?}"),
        }
        assert_eq!(transport.requests_for("shrinks.txt").len(), 1);

        match &c.states()[0].1 {
            UploadState::Failed { message } => {
                assert!(message.starts_with("Failed to read shrinks.txt at offset 4"), "{message}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(
            e,
            ProgressEvent::Status { message, .. } if message.contains("hashing")
        )));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = UploadCoordinator::new(
            UploadConfig::default(),
            UploadContext::default(),
            Arc::new(MockTransport::new()),
            tx,
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
