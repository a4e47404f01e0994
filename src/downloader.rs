use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use url::Url;

use crate::error::DownloadError;
use crate::models::{ItemStatus, MediaItem};

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Streams media bodies. Implemented by the HTTP client and by test fakes.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Writes the body of `url` into `sink`, returning the byte count.
    async fn fetch_to(&self, url: &Url, sink: &mut MediaSink) -> Result<u64, DownloadError>;
}

/// Hooks the worker calls around each item.
#[async_trait]
pub trait DownloadObserver: Send + Sync {
    /// Returning false stops the run; the item stays queued.
    async fn before_item(&self, _item: &MediaItem) -> bool {
        true
    }

    fn on_started(&self, _item: &MediaItem) {}

    fn on_finished(&self, _item: &MediaItem) {}

    /// Resolves once the in-flight download should be abandoned.
    async fn cancelled(&self) {
        std::future::pending::<()>().await
    }
}

impl DownloadObserver for () {}

/// Destination file for one item, with its progress bar.
pub struct MediaSink {
    file: File,
    path: PathBuf,
    written: u64,
    expected: Option<u64>,
    pb: ProgressBar,
}

impl MediaSink {
    fn new(file: File, path: PathBuf, pb: ProgressBar) -> Self {
        Self {
            file,
            path,
            written: 0,
            expected: None,
            pb,
        }
    }

    /// Announces the body length. `finish` rejects a shorter body.
    pub fn expect_length(&mut self, total: Option<u64>) {
        self.expected = total;
        if let Some(total) = total {
            self.pb.set_length(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg:30} {bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")
            {
                self.pb.set_style(style.progress_chars("=>-"));
            }
        }
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        self.file.write_all(chunk).map_err(|e| self.io_error(e))?;
        self.written += chunk.len() as u64;
        self.pb.set_position(self.written);
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reset(&mut self) -> Result<(), DownloadError> {
        self.file.set_len(0).map_err(|e| self.io_error(e))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| self.io_error(e))?;
        self.written = 0;
        self.expected = None;
        self.pb.set_position(0);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DownloadError> {
        if let Some(expected) = self.expected.filter(|&n| self.written < n) {
            return Err(DownloadError::Incomplete {
                path: self.path.clone(),
                written: self.written,
                expected,
            });
        }
        self.file.flush().map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> DownloadError {
        DownloadError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Downloads queued media items one at a time, in enqueue order.
///
/// A URL is accepted at most once per worker, so one worker per session
/// gives session-wide de-duplication. Existing files are never overwritten.
pub struct DownloadWorker {
    source: Arc<dyn MediaSource>,
    output_dir: PathBuf,
    retries: u32,
    retry_delay: Duration,
    queue: VecDeque<MediaItem>,
    seen: HashSet<Url>,
    progress: MultiProgress,
    show_progress: bool,
}

impl DownloadWorker {
    pub fn new(
        source: Arc<dyn MediaSource>,
        output_dir: &Path,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, DownloadError> {
        fs::create_dir_all(output_dir).map_err(|source| DownloadError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            source,
            output_dir: output_dir.to_path_buf(),
            retries,
            retry_delay,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            progress: MultiProgress::new(),
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Queues an item. Returns false if its URL was seen before.
    pub fn enqueue(&mut self, item: MediaItem) -> bool {
        if !self.seen.insert(item.url.clone()) {
            debug!("Skipping duplicate {}", item.url);
            return false;
        }
        self.queue.push_back(item);
        true
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Takes whatever is still queued, leaving the items Pending.
    pub fn take_pending(&mut self) -> Vec<MediaItem> {
        self.queue.drain(..).collect()
    }

    /// Drains the queue. Each returned item is Done or Failed; a failed item
    /// never stops the run. A cancelled item goes back to the queue front.
    pub async fn run(&mut self, observer: &dyn DownloadObserver) -> Vec<MediaItem> {
        let mut finished = Vec::new();

        while let Some(mut item) = self.queue.pop_front() {
            if !observer.before_item(&item).await {
                self.queue.push_front(item);
                break;
            }

            item.status = ItemStatus::Downloading;
            observer.on_started(&item);

            let result = tokio::select! {
                result = self.download(&mut item) => Some(result),
                _ = observer.cancelled() => None,
            };
            match result {
                Some(Ok(())) => item.status = ItemStatus::Done,
                Some(Err(e)) => {
                    item.status = ItemStatus::Failed;
                    item.error = Some(e.to_string());
                }
                None => {
                    debug!("Abandoned {}", item.url);
                    discard_partial(&mut item);
                    item.status = ItemStatus::Pending;
                    self.queue.push_front(item);
                    break;
                }
            }

            observer.on_finished(&item);
            finished.push(item);
        }

        self.progress.clear().ok();
        finished
    }

    async fn download(&self, item: &mut MediaItem) -> Result<(), DownloadError> {
        let (path, file) = self.claim_path(&item.filename)?;
        item.path = Some(path.clone());

        let pb = self.progress_bar(&item.filename);
        let mut sink = MediaSink::new(file, path.clone(), pb.clone());

        let result = self.fetch_with_retry(&item.url, &mut sink).await;
        drop(sink);
        match result {
            Ok(bytes) => {
                item.bytes = bytes;
                pb.finish_with_message(format!("{} done", item.filename));
                Ok(())
            }
            Err(e) => {
                discard_partial(item);
                pb.abandon_with_message(format!("{} failed", item.filename));
                Err(e)
            }
        }
    }

    async fn fetch_with_retry(&self, url: &Url, sink: &mut MediaSink) -> Result<u64, DownloadError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let fetched = self.source.fetch_to(url, sink).await;
            match fetched.and_then(|bytes| sink.finish().map(|()| bytes)) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt <= self.retries && is_retryable(&e) => {
                    // exponential backoff: 1x, 2x, 4x ... capped at 30s
                    let delay = self
                        .retry_delay
                        .saturating_mul(1 << (attempt - 1).min(16))
                        .min(Duration::from_secs(30));
                    warn!(
                        "Retry {}/{} for {} in {:?}: {}",
                        attempt, self.retries, url, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    sink.reset()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Creates the destination file, appending `_1`, `_2`, ... to the stem
    /// until a free name is found.
    fn claim_path(&self, filename: &str) -> Result<(PathBuf, File), DownloadError> {
        for n in 0..MAX_NAME_ATTEMPTS {
            let name = if n == 0 {
                filename.to_string()
            } else {
                disambiguate(filename, n)
            };
            let path = self.output_dir.join(&name);

            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(DownloadError::Io { path, source }),
            }
        }

        Err(DownloadError::Io {
            path: self.output_dir.join(filename),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
        })
    }

    fn progress_bar(&self, filename: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = self.progress.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::default_bar().template("{msg:30} {bytes} ({bytes_per_sec})") {
            pb.set_style(style);
        }
        pb.set_message(filename.to_string());
        pb
    }
}

fn is_retryable(error: &DownloadError) -> bool {
    match error {
        DownloadError::Status { status, .. } => *status >= 500 || *status == 429,
        DownloadError::Network { .. } | DownloadError::Incomplete { .. } => true,
        DownloadError::Io { .. } => false,
    }
}

fn discard_partial(item: &mut MediaItem) {
    if let Some(path) = item.path.take() {
        if let Err(e) = fs::remove_file(&path) {
            warn!("Could not remove partial {}: {}", path.display(), e);
        }
    }
}

pub fn disambiguate(filename: &str, n: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, n, ext),
        _ => format!("{}_{}", filename, n),
    }
}
