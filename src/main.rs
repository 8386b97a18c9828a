use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use chunkup::commands::{delete, upload};
use chunkup::crypto::checksum::ChecksumAlgorithm;
use chunkup::protocol::messages::Action;
use chunkup::transfer::progress::{ProgressEvent, Severity};
use chunkup::transfer::source::format_bytes;
use chunkup::{HttpTransport, UploadConfig, UploadContext};

#[derive(Parser)]
#[command(author, version, about = "Chunked, checksummed HTTP file uploads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files (directories are expanded) in sequential chunks
    Upload {
        paths: Vec<PathBuf>,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        chunk_size: Option<u64>,

        /// Read window used while hashing
        #[arg(long)]
        window: Option<u64>,

        /// md5 or sha256
        #[arg(long)]
        algorithm: Option<ChecksumAlgorithm>,

        /// Queue every path instead of only the first
        #[arg(long)]
        multiple: bool,

        /// Replace the stored file named by --file-id
        #[arg(long)]
        update: bool,

        #[arg(long)]
        csrf_token: Option<String>,

        #[arg(long)]
        file_id: Option<String>,
    },
    /// Delete a stored file
    Delete {
        #[arg(long)]
        url: String,

        #[arg(long)]
        file_id: String,

        #[arg(long)]
        csrf_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    chunkup::init_tracing("chunkup=info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            paths,
            config,
            url,
            chunk_size,
            window,
            algorithm,
            multiple,
            update,
            csrf_token,
            file_id,
        } => {
            if paths.is_empty() {
                bail!("no files given");
            }

            let mut upload_config = match &config {
                Some(path) => UploadConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => UploadConfig::default(),
            };
            if let Some(url) = url {
                upload_config.target_url = url;
            }
            if let Some(size) = chunk_size {
                upload_config.chunk_size = size;
            }
            if let Some(size) = window {
                upload_config.checksum_window = size;
            }
            if let Some(algorithm) = algorithm {
                upload_config.checksum_algorithm = algorithm;
            }
            upload_config.multiple |= multiple;

            let context = UploadContext {
                csrf_token,
                file_id,
                action: if update { Action::Update } else { Action::Create },
            };

            let transport =
                Arc::new(HttpTransport::default().with_progress_step(upload_config.progress_step));
            let summary =
                upload::start_upload(upload_config, context, paths, transport, print_event)
                    .await?;

            for (name, url) in &summary.succeeded {
                match url {
                    Some(url) => println!("ok      {name} -> {url}"),
                    None => println!("ok      {name}"),
                }
            }
            for (name, message) in &summary.failed {
                println!("failed  {name}: {message}");
            }
            for (name, reason) in &summary.skipped {
                println!("skipped {name}: {reason}");
            }
            if !summary.failed.is_empty() {
                bail!("{} file(s) failed to upload", summary.failed.len());
            }
        }
        Commands::Delete {
            url,
            file_id,
            csrf_token,
        } => {
            let context = UploadContext {
                csrf_token,
                file_id: Some(file_id),
                ..UploadContext::default()
            };
            let message = delete::delete_file(&HttpTransport::default(), &url, context).await?;
            println!("{message}");
        }
    }

    Ok(())
}

fn print_event(event: ProgressEvent) {
    match event {
        ProgressEvent::HashStart { name } => println!("hashing {name}..."),
        ProgressEvent::HashEnd {
            name,
            checksum: Some(checksum),
        } => println!("hashed  {name} {checksum}"),
        ProgressEvent::HashEnd { name, checksum: None } => println!("unreadable {name}"),
        ProgressEvent::Progress {
            checksum,
            percent,
            bytes_sent,
            bytes_total,
            speed_bps,
            eta_seconds,
            failed,
        } => debug!(
            "{checksum}: {percent}% {}/{} at {}/s, eta {eta_seconds}s{}",
            format_bytes(bytes_sent),
            format_bytes(bytes_total),
            format_bytes(speed_bps),
            if failed { " (failed)" } else { "" }
        ),
        ProgressEvent::Status {
            checksum,
            message,
            severity,
        } => println!("{} {checksum}: {message}", severity_tag(severity)),
        ProgressEvent::Completed { checksum, url } => {
            println!("done    {checksum} {}", url.unwrap_or_default())
        }
        ProgressEvent::Error { messages } => {
            for message in messages {
                eprintln!("error   {message}");
            }
        }
        ProgressEvent::Notify { severity, message } => {
            println!("{} {message}", severity_tag(severity))
        }
    }
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "[....]",
        Severity::Success => "[ ok ]",
        Severity::Danger => "[fail]",
    }
}
