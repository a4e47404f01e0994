//! Scrapes media files from paginated web pages.
//!
//! A session walks from a starting URL through "next page" links, collects
//! every link whose path ends in one of the configured extensions and
//! downloads each file once into a destination directory. In CAPTCHA mode
//! the walk pauses once the start page is open, and again whenever a
//! challenge page shows up, until a human says it may continue.

pub mod captcha;
pub mod cli;
pub mod console;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod pagination;
pub mod report;
pub mod state;
#[cfg(test)]
pub(crate) mod test_support;

pub use captcha::{CaptchaGate, GateState};
pub use downloader::{DownloadWorker, MediaSink, MediaSource};
pub use error::{ConfigError, DownloadError, NavigationError, ScrapeError};
pub use fetcher::{Browser, PageFetcher, RawPage};
pub use http::HttpClient;
pub use models::{
    ItemStatus, MediaItem, PageContent, PageResult, ScrapeConfig, SessionOptions, SessionOutcome,
    SessionState,
};
pub use orchestrator::{ScrapeControl, Scraper};
pub use state::{LogLevel, LogLine};
