use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::crypto::checksum::{compute_checksum, Checksum, ChecksumAlgorithm};
use crate::error::{AppError, AppResult};
use crate::transfer::progress::{EventSender, ProgressEvent};
use crate::transfer::source::FileSource;

/// What is known about a selected file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Set once hashing completes, then fixed.
    pub checksum: Option<Checksum>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum UploadState {
    Idle,
    Hashing,
    Queued,
    Uploading { percent: u8 },
    Succeeded { url: Option<String> },
    Failed { message: String },
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Hashing => "Hashing",
            Self::Queued => "Queued",
            Self::Uploading { .. } => "Uploading",
            Self::Succeeded { .. } => "Succeeded",
            Self::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }

    /// Allowed moves: Idle→Hashing→Queued→Uploading→{Succeeded|Failed}, plus
    /// Hashing→Failed and Uploading→Uploading for percent updates.
    fn can_become(&self, next: &UploadState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Hashing)
                | (Self::Hashing, Self::Queued)
                | (Self::Hashing, Self::Failed { .. })
                | (Self::Queued, Self::Uploading { .. })
                | (Self::Uploading { .. }, Self::Uploading { .. })
                | (Self::Uploading { .. }, Self::Succeeded { .. })
                | (Self::Uploading { .. }, Self::Failed { .. })
        )
    }
}

/// One file's lifecycle: hashing, then a sequential chunk upload.
///
/// The state is owned here and only read by the presentation layer.
pub struct UploadSession {
    pub id: String,
    source: Arc<dyn FileSource>,
    record: FileRecord,
    state: RwLock<UploadState>,
}

impl UploadSession {
    pub fn new(source: Arc<dyn FileSource>) -> Self {
        let record = FileRecord {
            name: source.name().to_string(),
            size: source.size(),
            mime_type: source.mime_type().to_string(),
            checksum: None,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            record,
            state: RwLock::new(UploadState::Idle),
        }
    }

    /// Computes the content checksum and moves Idle→Hashing→Queued.
    ///
    /// A read failure moves the session straight to Failed.
    pub async fn hash(
        &mut self,
        window_size: u64,
        algorithm: ChecksumAlgorithm,
        events: &EventSender,
    ) -> AppResult<Checksum> {
        if let Some(checksum) = &self.record.checksum {
            return Ok(checksum.clone());
        }

        self.set_state(UploadState::Hashing)?;
        let name = self.record.name.clone();
        events.send(ProgressEvent::HashStart { name: name.clone() }).ok();

        match compute_checksum(self.source.as_ref(), window_size, algorithm).await {
            Ok(checksum) => {
                info!(
                    "session {}: '{name}' {} = {checksum}",
                    self.id,
                    algorithm.as_str()
                );
                self.record.checksum = Some(checksum.clone());
                self.set_state(UploadState::Queued)?;
                events
                    .send(ProgressEvent::HashEnd {
                        name,
                        checksum: Some(checksum.clone()),
                    })
                    .ok();
                Ok(checksum)
            }
            Err(e) => {
                warn!("session {}: hashing '{name}' failed: {e}", self.id);
                self.set_state(UploadState::Failed {
                    message: e.to_string(),
                })?;
                events
                    .send(ProgressEvent::HashEnd {
                        name,
                        checksum: None,
                    })
                    .ok();
                Err(e)
            }
        }
    }

    /// Applies a transition, rejecting anything that would move backwards.
    pub fn set_state(&self, next: UploadState) -> AppResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.can_become(&next) {
            return Err(AppError::InvalidTransition {
                from: state.name(),
                to: next.name(),
            });
        }
        if state.name() != next.name() {
            debug!("session {}: {} -> {}", self.id, state.name(), next.name());
        }
        *state = next;
        Ok(())
    }

    /// Raises the reported percent of an uploading session. Never lowers it.
    pub fn update_percent(&self, percent: u8) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let UploadState::Uploading { percent: current } = &mut *state {
            *current = (*current).max(percent.min(100));
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self.state(), UploadState::Uploading { .. })
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.record.checksum.as_ref()
    }

    pub fn source(&self) -> &Arc<dyn FileSource> {
        &self.source
    }
}
