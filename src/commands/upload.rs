use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{UploadConfig, UploadContext};
use crate::error::{AppError, AppResult};
use crate::network::transport::ChunkTransport;
use crate::transfer::coordinator::UploadCoordinator;
use crate::transfer::progress::{ProgressEvent, Severity};
use crate::transfer::source::{expand_paths, format_bytes};

/// What happened to each input file.
#[derive(Debug, Default, Serialize)]
pub struct UploadSummary {
    /// `(file name, result url)`
    pub succeeded: Vec<(String, Option<String>)>,
    /// `(file name, error message)`
    pub failed: Vec<(String, String)>,
    /// Files that never entered the queue: duplicates and unreadable files.
    pub skipped: Vec<(String, String)>,
}

impl UploadSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Queue `paths` (directories are expanded), upload them, and forward every
/// presentation event to `on_event` in emission order.
pub async fn start_upload<F>(
    config: UploadConfig,
    context: UploadContext,
    paths: Vec<PathBuf>,
    transport: Arc<dyn ChunkTransport>,
    on_event: F,
) -> AppResult<UploadSummary>
where
    F: Fn(ProgressEvent) + Send + 'static,
{
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();

    // Forward progress events to the caller
    let forwarder = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            on_event(event);
        }
    });

    let multiple = config.multiple;
    let mut coordinator = UploadCoordinator::new(config, context, transport, progress_tx.clone())?;

    let mut summary = UploadSummary::default();
    let mut files = Vec::new();
    for path in &paths {
        match expand_paths(std::slice::from_ref(path)).await {
            Ok(expanded) => files.extend(expanded),
            Err(e) => {
                warn!("upload: cannot read '{}': {e}", path.display());
                let reason = format!("{}: {e}", path.display());
                summary.skipped.push((display_name(path), reason));
            }
        }
    }

    if !multiple && files.len() > 1 {
        warn!(
            "upload: single-file mode, uploading only '{}'",
            files[0].display()
        );
        progress_tx
            .send(ProgressEvent::Notify {
                severity: Severity::Warning,
                message: "Single-file mode: only the first file is processed.".into(),
            })
            .ok();
        files.truncate(1);
    }
    drop(progress_tx);

    for path in &files {
        match coordinator.add_path(path).await {
            Ok(record) => info!(
                "upload: added '{}' ({})",
                record.name,
                format_bytes(record.size)
            ),
            Err(e) => {
                let name = display_name(path);
                warn!("upload: skipping '{name}': {e}");
                summary.skipped.push((name, e.to_string()));
            }
        }
    }

    let outcomes = coordinator.start_all().wait().await;
    for outcome in outcomes {
        match outcome.result {
            Ok(url) => summary.succeeded.push((outcome.name, url)),
            Err(e) => summary.failed.push((outcome.name, e.user_message())),
        }
    }

    // Closes the last event sender so the forwarder drains and exits.
    drop(coordinator);
    forwarder.await.map_err(|e| {
        error!("upload: event forwarder failed: {e}");
        AppError::Join(e.to_string())
    })?;

    info!(
        "upload: {} succeeded, {} failed, {} skipped",
        summary.succeeded.len(),
        summary.failed.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
