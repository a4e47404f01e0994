use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A page could not be loaded. Ends the session.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("timed out after {}s waiting for {url}", .after.as_secs())]
    Timeout { url: String, after: Duration },

    #[error("failed to reach {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("invalid URL {0}")]
    InvalidUrl(String),
}

/// A single media item failed. The session keeps going.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("{} is incomplete: {written} of {expected} bytes", .path.display())]
    Incomplete {
        path: PathBuf,
        written: u64,
        expected: u64,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a starting URL is required")]
    MissingUrl,

    #[error("invalid starting URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("at least one file extension is required")]
    NoExtensions,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("a scrape session is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare session: {0}")]
    Setup(String),
}
