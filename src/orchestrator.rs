//! Drives a scrape session: fetch, match, download, paginate, repeat.
//!
//! The loop runs on a spawned Tokio task. Everything the outside world needs
//! goes through [`ScrapeControl`], which never waits on the worker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::captcha::{CaptchaGate, GateState, Passage};
use crate::downloader::{DownloadObserver, DownloadWorker, MediaSource};
use crate::error::ScrapeError;
use crate::fetcher::{Browser, PageFetcher};
use crate::matcher::select_media;
use crate::models::{
    ItemStatus, MediaItem, ScrapeConfig, SessionOptions, SessionOutcome, SessionState,
};
use crate::pagination::{self, NextPageRef};
use crate::report::{LinkRecorder, ReportManager, RunReport};
use crate::state::{LogLine, SessionTracker, StopSignal};

/// Thread-safe handle on a running (or finished) session.
#[derive(Clone)]
pub struct ScrapeControl {
    tracker: SessionTracker,
    stop: StopSignal,
    gate: Arc<CaptchaGate>,
}

impl ScrapeControl {
    /// Asks the loop to end at its next checkpoint. In-flight network calls
    /// are allowed to finish.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Delivers the human "resume" signal to the CAPTCHA gate.
    pub fn resume(&self) -> bool {
        self.gate.resume()
    }

    /// Closes the CAPTCHA gate by hand, as if a CAPTCHA had been detected.
    pub fn trip_captcha(&self) -> bool {
        self.gate.trip()
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn status(&self) -> SessionState {
        let mut state = self.tracker.snapshot();
        state.paused = state.running && (state.paused || self.gate.is_waiting());
        state
    }

    pub fn logs(&self) -> Vec<LogLine> {
        self.tracker.lines()
    }
}

/// Owns the backends and runs at most one session at a time.
pub struct Scraper {
    browser: Arc<dyn Browser>,
    source: Arc<dyn MediaSource>,
    options: SessionOptions,
    control: Option<ScrapeControl>,
    worker: Option<JoinHandle<Vec<MediaItem>>>,
    items: Vec<MediaItem>,
}

impl Scraper {
    pub fn new(
        browser: Arc<dyn Browser>,
        source: Arc<dyn MediaSource>,
        options: SessionOptions,
    ) -> Self {
        Self {
            browser,
            source,
            options,
            control: None,
            worker: None,
            items: Vec::new(),
        }
    }

    /// Spawns the session on the current Tokio runtime.
    pub fn start(&mut self, config: ScrapeConfig) -> Result<ScrapeControl, ScrapeError> {
        if self.worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(ScrapeError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ScrapeError::Setup(format!("no Tokio runtime: {}", e)))?;

        let worker = DownloadWorker::new(
            self.source.clone(),
            &config.destination,
            self.options.retries,
            self.options.retry_delay,
        )
        .map_err(|e| ScrapeError::Setup(e.to_string()))?
        .with_progress(self.options.show_progress);

        let deadline = self.options.nav_timeout + self.options.ready_timeout + Duration::from_secs(1);
        let fetcher = PageFetcher::new(self.browser.clone(), deadline);

        let control = ScrapeControl {
            tracker: SessionTracker::new(),
            stop: StopSignal::new(),
            gate: Arc::new(CaptchaGate::new(
                config.captcha_mode,
                &self.options.captcha_markers,
            )),
        };
        control.tracker.update(|s| {
            *s = SessionState {
                running: true,
                current_url: Some(config.start_url.to_string()),
                ..SessionState::default()
            }
        });

        let session = Session {
            config: Arc::new(config),
            options: self.options.clone(),
            fetcher,
            worker,
            links: self.options.links_file.as_deref().map(LinkRecorder::new),
            report: self.options.report_file.as_deref().map(ReportManager::new),
            control: control.clone(),
            items: Vec::new(),
        };

        self.items.clear();
        self.worker = Some(runtime.spawn(session.run()));
        self.control = Some(control.clone());
        Ok(control)
    }

    pub fn control(&self) -> Option<ScrapeControl> {
        self.control.clone()
    }

    pub fn stop(&self) {
        if let Some(control) = &self.control {
            control.stop();
        }
    }

    pub fn resume(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.resume())
    }

    pub fn status(&self) -> SessionState {
        self.control
            .as_ref()
            .map(|c| c.status())
            .unwrap_or_default()
    }

    pub fn logs(&self) -> Vec<LogLine> {
        self.control
            .as_ref()
            .map(|c| c.logs())
            .unwrap_or_default()
    }

    /// Items processed by the last finished session, in enqueue order.
    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    /// Waits for the current session to end and returns its final state.
    pub async fn wait(&mut self) -> SessionState {
        if let Some(handle) = self.worker.take() {
            match handle.await {
                Ok(items) => self.items = items,
                Err(e) => {
                    if let Some(control) = &self.control {
                        control
                            .tracker
                            .error(format!("Scrape worker crashed: {}", e));
                        control.tracker.update(|s| {
                            s.running = false;
                            s.outcome = Some(SessionOutcome::Failed {
                                reason: e.to_string(),
                            });
                        });
                    }
                }
            }
        }
        self.status()
    }
}

struct Session {
    config: Arc<ScrapeConfig>,
    options: SessionOptions,
    fetcher: PageFetcher,
    worker: DownloadWorker,
    links: Option<LinkRecorder>,
    report: Option<ReportManager>,
    control: ScrapeControl,
    items: Vec<MediaItem>,
}

impl Session {
    async fn run(mut self) -> Vec<MediaItem> {
        let tracker = self.control.tracker.clone();
        tracker.info(format!("Starting scrape of {}", self.config.start_url));
        tracker.info(format!(
            "File types: {}",
            self.config
                .extensions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
        if self.config.paginates() {
            tracker.info(format!(
                "Next patterns: {}",
                self.config.next_page_patterns.join(", ")
            ));
        }
        if self.config.captcha_mode {
            tracker.info(
                "CAPTCHA mode on: the run pauses after the start page and whenever a CAPTCHA is detected",
            );
        }

        let outcome = self.walk().await;
        self.items.extend(self.worker.take_pending());

        tracker.update(|s| {
            s.running = false;
            s.paused = false;
            s.outcome = Some(outcome.clone());
        });
        let state = tracker.snapshot();
        let summary = format!(
            "Finished ({}): {} found, {} downloaded, {} failed",
            outcome, state.items_found, state.items_downloaded, state.items_failed
        );
        match outcome {
            SessionOutcome::Failed { .. } => tracker.error(summary),
            _ => tracker.info(summary),
        }

        if let Some(report) = &self.report {
            let log = tracker.lines();
            let result = report.save_report(&RunReport {
                config: &self.config,
                state: &state,
                items: &self.items,
                log: &log,
            });
            if let Err(e) = result {
                tracker.warn(format!("Could not write report: {:#}", e));
            }
        }

        self.items
    }

    async fn walk(&mut self) -> SessionOutcome {
        let tracker = self.control.tracker.clone();
        let mut next: Option<NextPageRef> = None;
        let mut page_index = 0u32;
        let mut visited: HashSet<Url> = HashSet::new();
        let mut start_gate = self.config.captcha_mode;

        loop {
            if !self.checkpoint().await {
                return SessionOutcome::Stopped;
            }

            let loaded = match &next {
                None => self.fetcher.load(&self.config.start_url).await,
                Some(next) => pagination::navigate(&mut self.fetcher, next).await,
            };
            let page = match loaded {
                Ok(page) => page,
                Err(e) => {
                    tracker.error(format!("Error on page {}: {}", page_index + 1, e));
                    return SessionOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            };
            if self.control.stop.is_stopped() {
                return SessionOutcome::Stopped;
            }

            if std::mem::take(&mut start_gate) && self.control.gate.trip() {
                tracker.warn(format!(
                    "Start page {} is open; clear any CAPTCHA, then resume",
                    page.url
                ));
                if !self.checkpoint().await {
                    return SessionOutcome::Stopped;
                }
            }

            let gate = &self.control.gate;
            if gate.detect(&page.content) && (gate.trip() || gate.is_waiting()) {
                tracker.warn(format!(
                    "CAPTCHA detected on {}; solve it, then resume",
                    page.url
                ));
                if !self.checkpoint().await {
                    return SessionOutcome::Stopped;
                }
                tracker.info(format!("Reloading {}", page.requested));
                continue;
            }

            page_index += 1;
            visited.insert(page.requested.clone());
            visited.insert(page.url.clone());
            tracker.update(|s| {
                s.page_index = page_index;
                s.current_url = Some(page.url.to_string());
            });

            let mut fresh = Vec::new();
            for item in select_media(&page.candidates, &self.config.extensions, page_index) {
                let url = item.url.clone();
                if self.worker.enqueue(item) {
                    fresh.push(url);
                }
            }
            tracker.update(|s| s.items_found += fresh.len());
            if let Some(links) = &self.links {
                if let Err(e) = links.append(&fresh) {
                    tracker.warn(format!("{:#}", e));
                }
            }

            let observer = SessionObserver {
                control: &self.control,
            };
            let finished = self.worker.run(&observer).await;
            let downloaded = finished
                .iter()
                .filter(|i| i.status == ItemStatus::Done)
                .count();
            self.items.extend(finished);

            tracker.info(format!(
                "Page {}: {} - {} new files, {} downloaded",
                page_index,
                page.url,
                fresh.len(),
                downloaded
            ));

            if self
                .options
                .max_pages
                .is_some_and(|max| page_index >= max)
            {
                tracker.info(format!("Reached the {} page limit", page_index));
                return SessionOutcome::Completed;
            }

            if !self.checkpoint().await {
                return SessionOutcome::Stopped;
            }

            match pagination::find_next(&page.content, &self.config.next_page_patterns) {
                None => {
                    if self.config.paginates() {
                        tracker.info("No more pages found");
                    }
                    return SessionOutcome::Completed;
                }
                Some(found) if visited.contains(&found.url) => {
                    tracker.info(format!(
                        "Next page {} was already visited; stopping",
                        found.url
                    ));
                    return SessionOutcome::Completed;
                }
                Some(found) => {
                    debug!(
                        "Next page {} via {:?} on pattern {:?}",
                        found.url, found.matched_by, found.pattern
                    );
                    next = Some(found);
                }
            }

            if !self.options.page_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.options.page_delay) => {}
                    _ = self.control.stop.stopped() => return SessionOutcome::Stopped,
                }
            }
        }
    }

    async fn checkpoint(&self) -> bool {
        pass_checkpoint(&self.control).await
    }
}

/// Stop check plus CAPTCHA gate. False means the session must end.
async fn pass_checkpoint(control: &ScrapeControl) -> bool {
    if control.stop.is_stopped() {
        return false;
    }
    if control.gate.is_waiting() {
        control.tracker.update(|s| s.paused = true);
        control.tracker.info("Paused at CAPTCHA gate, waiting for resume");
    }

    let passage = control.gate.pass(&control.stop).await;

    let was_paused = control.tracker.snapshot().paused;
    control.tracker.update(|s| s.paused = false);
    if passage == Passage::Proceed && was_paused {
        control.tracker.info("Resumed");
    }

    passage == Passage::Proceed && !control.stop.is_stopped()
}

struct SessionObserver<'a> {
    control: &'a ScrapeControl,
}

#[async_trait]
impl<'a> DownloadObserver for SessionObserver<'a> {
    async fn before_item(&self, _item: &MediaItem) -> bool {
        pass_checkpoint(self.control).await
    }

    fn on_started(&self, item: &MediaItem) {
        debug!("Downloading {} -> {}", item.url, item.filename);
    }

    async fn cancelled(&self) {
        self.control.stop.stopped().await
    }

    fn on_finished(&self, item: &MediaItem) {
        let tracker = &self.control.tracker;
        match item.status {
            ItemStatus::Done => tracker.update(|s| s.items_downloaded += 1),
            ItemStatus::Failed => {
                tracker.update(|s| s.items_failed += 1);
                tracker.warn(format!(
                    "Download failed for {}: {}",
                    item.url,
                    item.error.as_deref().unwrap_or("unknown error")
                ));
            }
            ItemStatus::Pending | ItemStatus::Downloading => {}
        }
    }
}
