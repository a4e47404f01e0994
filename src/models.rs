use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mov"];

pub const DEFAULT_CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "h-captcha",
    "cf-turnstile",
    "challenge-platform",
    "captcha-container",
    "verify you are human",
];

/// What to scrape. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub start_url: Url,
    /// Lower-case suffixes without the leading dot.
    pub extensions: BTreeSet<String>,
    /// Tried in order; empty means a single-page scrape.
    pub next_page_patterns: Vec<String>,
    pub captcha_mode: bool,
    pub destination: PathBuf,
}

impl ScrapeConfig {
    pub fn new<E, P>(
        start_url: &str,
        extensions: E,
        next_page_patterns: P,
        captcha_mode: bool,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError>
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let start_url = parse_start_url(start_url)?;

        let extensions: BTreeSet<String> = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        let next_page_patterns = next_page_patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            start_url,
            extensions,
            next_page_patterns,
            captcha_mode,
            destination: destination.into(),
        })
    }

    pub fn paginates(&self) -> bool {
        !self.next_page_patterns.is_empty()
    }
}

fn parse_start_url(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::MissingUrl);
    }

    let parsed = match Url::parse(raw) {
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", raw)),
        other => other,
    };
    let url = parsed.map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", scheme),
        }),
    }
}

pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Runtime knobs that are not part of what gets scraped.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub nav_timeout: Duration,
    pub ready_timeout: Duration,
    /// Longest silence tolerated while a download is streaming.
    pub stall_timeout: Duration,
    pub page_delay: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub max_pages: Option<u32>,
    pub captcha_markers: Vec<String>,
    pub links_file: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            nav_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(3),
            stall_timeout: Duration::from_secs(30),
            page_delay: Duration::from_millis(300),
            retries: 3,
            retry_delay: Duration::from_secs(1),
            max_pages: None,
            captcha_markers: DEFAULT_CAPTCHA_MARKERS.iter().map(|m| m.to_string()).collect(),
            links_file: None,
            report_file: None,
            show_progress: true,
        }
    }
}

/// Rendered page source plus the URL it was served from.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: Url,
    pub html: String,
}

impl PageContent {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }

    /// Base for resolving relative links, honouring `<base href>`.
    pub fn base_url(&self, document: &Html) -> Url {
        let Ok(selector) = Selector::parse("base[href]") else {
            return self.url.clone();
        };
        document
            .select(&selector)
            .next()
            .and_then(|base| base.value().attr("href"))
            .and_then(|href| self.url.join(href.trim()).ok())
            .unwrap_or_else(|| self.url.clone())
    }
}

/// One page visit.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub requested: Url,
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    /// False when the readiness wait timed out and the content is partial.
    pub complete: bool,
    pub content: PageContent,
    /// Every absolute URL found in URL-bearing attributes, document order.
    pub candidates: Vec<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: Url,
    pub filename: String,
    pub status: ItemStatus,
    pub page: u32,
    pub path: Option<PathBuf>,
    pub bytes: u64,
    pub error: Option<String>,
}

impl MediaItem {
    pub fn new(url: Url, page: u32) -> Self {
        let filename = infer_filename(&url);
        Self {
            url,
            filename,
            status: ItemStatus::Pending,
            page,
            path: None,
            bytes: 0,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ItemStatus::Done | ItemStatus::Failed)
    }
}

/// Filename from the final path segment, percent-decoded and made safe for
/// the local filesystem.
pub fn infer_filename(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");

    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    let cleaned: String = decoded
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');

    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Stopped,
    Failed { reason: String },
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Stopped => write!(f, "stopped"),
            SessionOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Snapshot of a scrape run as seen from outside the worker.
///
/// `paused` is only ever true while `running` is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub page_index: u32,
    pub current_url: Option<String>,
    pub items_found: usize,
    pub items_downloaded: usize,
    pub items_failed: usize,
    pub running: bool,
    pub paused: bool,
    pub outcome: Option<SessionOutcome>,
}
