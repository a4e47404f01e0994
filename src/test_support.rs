//! In-memory web used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::downloader::{MediaSink, MediaSource};
use crate::error::{DownloadError, NavigationError};
use crate::fetcher::{Browser, RawPage};

struct PageEntry {
    bodies: Vec<String>,
    served: usize,
    complete: bool,
}

#[derive(Default)]
struct MediaEntry {
    bytes: Vec<u8>,
    status: Option<u16>,
    failures_left: u32,
    /// Content length to announce instead of the real one.
    announced: Option<u64>,
    /// Send the first half, then never finish.
    stalls: bool,
}

#[derive(Default)]
struct Inner {
    pages: Mutex<HashMap<String, PageEntry>>,
    media: Mutex<HashMap<String, MediaEntry>>,
    opens: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
}

/// Pages and media keyed by URL. Clones share state, so a test can keep one
/// handle for assertions while the scraper owns another.
#[derive(Clone, Default)]
pub struct FakeWeb {
    inner: Arc<Inner>,
}

impl FakeWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.page_sequence(url, &[html])
    }

    /// Serves `bodies` in order on successive visits, repeating the last.
    pub fn page_sequence(self, url: &str, bodies: &[&str]) -> Self {
        self.insert_page(url, bodies, true)
    }

    /// A page whose readiness wait timed out.
    pub fn partial_page(self, url: &str, html: &str) -> Self {
        self.insert_page(url, &[html], false)
    }

    pub fn media(self, url: &str, bytes: &[u8]) -> Self {
        self.insert_media(url, bytes, MediaEntry::default())
    }

    pub fn missing_media(self, url: &str, status: u16) -> Self {
        self.insert_media(
            url,
            b"",
            MediaEntry {
                status: Some(status),
                ..MediaEntry::default()
            },
        )
    }

    /// Fails with a network error `failures` times before succeeding.
    pub fn flaky_media(self, url: &str, bytes: &[u8], failures: u32) -> Self {
        self.insert_media(
            url,
            bytes,
            MediaEntry {
                failures_left: failures,
                ..MediaEntry::default()
            },
        )
    }

    /// Announces `announced` bytes but ends the body after `bytes`.
    pub fn short_media(self, url: &str, bytes: &[u8], announced: u64) -> Self {
        self.insert_media(
            url,
            bytes,
            MediaEntry {
                announced: Some(announced),
                ..MediaEntry::default()
            },
        )
    }

    /// Writes half of `bytes`, then hangs.
    pub fn stalled_media(self, url: &str, bytes: &[u8]) -> Self {
        self.insert_media(
            url,
            bytes,
            MediaEntry {
                stalls: true,
                ..MediaEntry::default()
            },
        )
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock().unwrap() = latency;
        self
    }

    pub fn open_count(&self, url: &str) -> usize {
        count(&self.inner.opens, url)
    }

    pub fn total_opens(&self) -> usize {
        self.inner.opens.lock().unwrap().len()
    }

    pub fn download_count(&self, url: &str) -> usize {
        count(&self.inner.downloads, url)
    }

    pub fn total_downloads(&self) -> usize {
        self.inner.downloads.lock().unwrap().len()
    }

    fn insert_page(self, url: &str, bodies: &[&str], complete: bool) -> Self {
        self.inner.pages.lock().unwrap().insert(
            normalize(url),
            PageEntry {
                bodies: bodies.iter().map(|b| b.to_string()).collect(),
                served: 0,
                complete,
            },
        );
        self
    }

    fn insert_media(self, url: &str, bytes: &[u8], entry: MediaEntry) -> Self {
        self.inner.media.lock().unwrap().insert(
            normalize(url),
            MediaEntry {
                bytes: bytes.to_vec(),
                ..entry
            },
        );
        self
    }

    async fn delay(&self) {
        let latency = *self.inner.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url).unwrap().to_string()
}

fn count(log: &Mutex<Vec<String>>, url: &str) -> usize {
    let url = normalize(url);
    log.lock().unwrap().iter().filter(|u| **u == url).count()
}

#[async_trait]
impl Browser for FakeWeb {
    async fn open(&self, url: &Url) -> Result<RawPage, NavigationError> {
        self.inner.opens.lock().unwrap().push(url.to_string());
        self.delay().await;

        let mut pages = self.inner.pages.lock().unwrap();
        let Some(entry) = pages.get_mut(url.as_str()) else {
            return Err(NavigationError::Unreachable {
                url: url.to_string(),
                message: "host not found".to_string(),
            });
        };
        let index = entry.served.min(entry.bodies.len().saturating_sub(1));
        entry.served += 1;

        Ok(RawPage {
            final_url: url.clone(),
            status: 200,
            body: entry.bodies.get(index).cloned().unwrap_or_default(),
            complete: entry.complete,
        })
    }
}

#[async_trait]
impl MediaSource for FakeWeb {
    async fn fetch_to(&self, url: &Url, sink: &mut MediaSink) -> Result<u64, DownloadError> {
        self.inner.downloads.lock().unwrap().push(url.to_string());
        self.delay().await;

        let (bytes, status, fail, announced, stalls) = {
            let mut media = self.inner.media.lock().unwrap();
            let Some(entry) = media.get_mut(url.as_str()) else {
                return Err(DownloadError::Network {
                    url: url.to_string(),
                    message: "host not found".to_string(),
                });
            };
            let fail = entry.failures_left > 0;
            if fail {
                entry.failures_left -= 1;
            }
            (
                entry.bytes.clone(),
                entry.status,
                fail,
                entry.announced,
                entry.stalls,
            )
        };

        if let Some(status) = status {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status,
            });
        }

        if fail {
            sink.write_chunk(&bytes[..bytes.len() / 2])?;
            return Err(DownloadError::Network {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }

        sink.expect_length(Some(announced.unwrap_or(bytes.len() as u64)));
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        sink.write_chunk(head)?;
        if stalls {
            std::future::pending::<()>().await;
        }
        sink.write_chunk(tail)?;
        Ok(sink.written())
    }
}

/// Polls `condition` until it holds, panicking after ten seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
