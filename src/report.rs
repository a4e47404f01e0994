use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use url::Url;

use crate::models::{MediaItem, ScrapeConfig, SessionState};
use crate::state::LogLine;

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub config: &'a ScrapeConfig,
    pub state: &'a SessionState,
    pub items: &'a [MediaItem],
    pub log: &'a [LogLine],
}

/// Writes the end-of-run JSON report.
pub struct ReportManager {
    report_file: PathBuf,
}

impl ReportManager {
    pub fn new(report_file: &Path) -> Self {
        Self {
            report_file: report_file.to_path_buf(),
        }
    }

    pub fn save_report(&self, report: &RunReport<'_>) -> Result<()> {
        if let Some(parent) = self.report_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create report directory")?;
            }
        }

        let content =
            serde_json::to_string_pretty(report).context("Failed to serialize report")?;

        fs::write(&self.report_file, content).context("Failed to write report file")?;

        Ok(())
    }
}

/// Appends every newly discovered media URL to a text file, one per line.
pub struct LinkRecorder {
    path: PathBuf,
}

impl LinkRecorder {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn append(&self, urls: &[Url]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open links file {}", self.path.display()))?;

        for url in urls {
            writeln!(file, "{}", url).context("Failed to append link")?;
        }

        Ok(())
    }
}
