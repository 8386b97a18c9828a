pub mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod network;
pub mod protocol;
pub mod transfer;

pub use config::{UploadConfig, UploadContext};
pub use error::{AppError, AppResult};
pub use network::http::HttpTransport;
pub use transfer::coordinator::UploadCoordinator;
pub use transfer::progress::ProgressEvent;

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
