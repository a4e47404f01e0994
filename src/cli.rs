use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::models::{ScrapeConfig, SessionOptions, DEFAULT_CAPTCHA_MARKERS};

#[derive(Parser, Debug)]
#[command(name = "media-scrape")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Starting page URL
    #[arg(short, long)]
    pub url: String,

    /// File extensions to download (repeatable or comma separated)
    #[arg(short, long = "ext", value_delimiter = ',', default_values = ["mp4", "webm", "avi", "mov"])]
    pub extensions: Vec<String>,

    /// "Next page" pattern: CSS selector or link text (repeatable, tried in order)
    #[arg(short, long = "next")]
    pub next: Vec<String>,

    /// Pause for manual solving whenever a CAPTCHA page is detected
    #[arg(long)]
    pub captcha: bool,

    /// Text that marks a CAPTCHA page (repeatable, replaces the defaults)
    #[arg(long = "captcha-marker")]
    pub captcha_markers: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = "./downloads")]
    pub output: PathBuf,

    /// Number of retry attempts per file on failure
    #[arg(short, long, default_value = "3")]
    pub retries: u32,

    /// HTTP proxy (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Seconds to wait for a page to start responding
    #[arg(long, default_value = "10")]
    pub nav_timeout: u64,

    /// Seconds to wait for a page body before scanning what arrived
    #[arg(long, default_value = "3")]
    pub ready_timeout: u64,

    /// Seconds a download may go without receiving data before it is retried
    #[arg(long, default_value = "30")]
    pub stall_timeout: u64,

    /// Pause between pages in milliseconds
    #[arg(long, default_value = "300")]
    pub page_delay: u64,

    /// Stop after this many pages
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Append every discovered media URL to this file
    #[arg(long)]
    pub links_file: Option<PathBuf>,

    /// Write a JSON report of the run to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Hide per-file progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn scrape_config(&self) -> Result<ScrapeConfig, ConfigError> {
        ScrapeConfig::new(
            &self.url,
            &self.extensions,
            &self.next,
            self.captcha,
            self.output.clone(),
        )
    }

    pub fn session_options(&self) -> SessionOptions {
        let captcha_markers = if self.captcha_markers.is_empty() {
            DEFAULT_CAPTCHA_MARKERS.iter().map(|m| m.to_string()).collect()
        } else {
            self.captcha_markers.clone()
        };

        SessionOptions {
            nav_timeout: Duration::from_secs(self.nav_timeout),
            ready_timeout: Duration::from_secs(self.ready_timeout),
            stall_timeout: Duration::from_secs(self.stall_timeout),
            page_delay: Duration::from_millis(self.page_delay),
            retries: self.retries,
            max_pages: self.max_pages,
            captcha_markers,
            links_file: self.links_file.clone(),
            report_file: self.report.clone(),
            show_progress: !self.no_progress,
            ..SessionOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_common_video_formats() {
        let args = Args::try_parse_from(["media-scrape", "--url", "http://example.test/"]).unwrap();
        let config = args.scrape_config().unwrap();

        assert_eq!(
            config.extensions.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["avi", "mov", "mp4", "webm"]
        );
        assert!(!config.paginates());
        assert!(!config.captcha_mode);
        assert_eq!(config.destination, PathBuf::from("./downloads"));

        let options = args.session_options();
        assert_eq!(options.nav_timeout, Duration::from_secs(10));
        assert_eq!(options.page_delay, Duration::from_millis(300));
        assert_eq!(options.stall_timeout, Duration::from_secs(30));
        assert_eq!(options.captcha_markers.len(), DEFAULT_CAPTCHA_MARKERS.len());
        assert!(options.show_progress);
    }

    #[test]
    fn repeatable_and_delimited_values() {
        let args = Args::try_parse_from([
            "media-scrape",
            "-u",
            "http://example.test/list",
            "-e",
            "MP4,.mkv",
            "--ext",
            "webm",
            "-n",
            "a.next",
            "-n",
            "Next",
            "--captcha",
            "--captcha-marker",
            "are you a robot",
            "--max-pages",
            "5",
            "--no-progress",
        ])
        .unwrap();

        let config = args.scrape_config().unwrap();
        assert_eq!(
            config.extensions.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["mkv", "mp4", "webm"]
        );
        assert_eq!(config.next_page_patterns, vec!["a.next", "Next"]);
        assert!(config.captcha_mode);

        let options = args.session_options();
        assert_eq!(options.captcha_markers, vec!["are you a robot".to_string()]);
        assert_eq!(options.max_pages, Some(5));
        assert!(!options.show_progress);
    }

    #[test]
    fn url_is_required() {
        assert!(Args::try_parse_from(["media-scrape"]).is_err());
    }
}
