use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::AppResult;

/// Hidden files/directories to skip during folder expansion.
const HIDDEN_ENTRIES: &[&str] = &[".DS_Store", ".git", "Thumbs.db", ".gitignore", "__MACOSX"];

/// Fallback MIME type when the extension is unknown.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A file selected for upload.
///
/// Reads are by absolute byte range so that hashing and chunking can each
/// pull only the window they need.
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    fn mime_type(&self) -> &str;

    /// Reads bytes `[from, to)`.
    fn read_range(
        &self,
        from: u64,
        to: u64,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Bytes>> + Send + '_>>;
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
    mime_type: String,
}

impl LocalFile {
    pub async fn open(path: &Path) -> AppResult<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".into());
        let mime_type = detect_mime_type(path).unwrap_or(DEFAULT_MIME_TYPE).to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            mime_type,
        })
    }
}

impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read_range(
        &self,
        from: u64,
        to: u64,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Bytes>> + Send + '_>> {
        Box::pin(async move {
            let len = to.saturating_sub(from) as usize;
            let mut buf = vec![0u8; len];
            if len > 0 {
                let mut file = tokio::fs::File::open(&self.path).await?;
                file.seek(SeekFrom::Start(from)).await?;
                file.read_exact(&mut buf).await?;
            }
            Ok(Bytes::from(buf))
        })
    }
}

/// An in-memory file, e.g. bytes already received from another component.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    mime_type: String,
    data: Bytes,
    #[cfg(test)]
    fail_from: Option<u64>,
}

impl MemoryFile {
    pub fn new(name: &str, mime_type: &str, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
            #[cfg(test)]
            fail_from: None,
        }
    }

    /// Makes every read that reaches `offset` fail.
    #[cfg(test)]
    pub(crate) fn failing_from(mut self, offset: u64) -> Self {
        self.fail_from = Some(offset);
        self
    }

    #[cfg(test)]
    fn check_injected_failure(&self, to: u64) -> std::io::Result<()> {
        match self.fail_from {
            Some(fail_from) if to > fail_from => {
                Err(std::io::Error::other("simulated read failure"))
            }
            _ => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn check_injected_failure(&self, _to: u64) -> std::io::Result<()> {
        Ok(())
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read_range(
        &self,
        from: u64,
        to: u64,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Bytes>> + Send + '_>> {
        Box::pin(async move {
            self.check_injected_failure(to)?;

            let size = self.data.len() as u64;
            if from > to || to > size {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("range {from}..{to} outside of {size} bytes"),
                ));
            }
            Ok(self.data.slice(from as usize..to as usize))
        })
    }
}

/// Detects a MIME type from the file extension.
pub fn detect_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("svg") => Some("image/svg+xml"),
        Some("pdf") => Some("application/pdf"),
        Some("zip") => Some("application/zip"),
        Some("gz") => Some("application/gzip"),
        Some("tar") => Some("application/x-tar"),
        Some("json") => Some("application/json"),
        Some("xml") => Some("application/xml"),
        Some("csv") => Some("text/csv"),
        Some("txt" | "md") => Some("text/plain"),
        Some("html" | "htm") => Some("text/html"),
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("mp4") => Some("video/mp4"),
        Some("webm") => Some("video/webm"),
        _ => None,
    }
}

/// Expand input paths: directories become their recursive file listing,
/// plain files pass through as-is.
pub async fn expand_paths(input_paths: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in input_paths {
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            files.extend(expand_directory(path).await?);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// Recursively walk a directory, returning its regular files.
/// Skips hidden files and common junk files.
pub async fn expand_directory(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut result = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current_dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with('.') || HIDDEN_ENTRIES.contains(&name.as_str()) {
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                result.push(entry.path());
            }
        }
    }

    result.sort();
    Ok(result)
}

/// Human-readable byte count, e.g. `1.5 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes == 0 {
        return "0 Bytes".into();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}
