use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use url::Url;

use crate::downloader::{MediaSink, MediaSource};
use crate::error::{DownloadError, NavigationError};
use crate::fetcher::{Browser, RawPage};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// reqwest-backed browsing and download backend.
///
/// Pages are "ready" once the whole body has arrived; if that takes longer
/// than `ready_timeout` the partial body is handed back instead. A download
/// fails once the server sends nothing for `stall_timeout`.
///
/// Cookies persist across requests so a cleared challenge stays cleared.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    nav_timeout: Duration,
    ready_timeout: Duration,
    stall_timeout: Duration,
}

impl HttpClient {
    pub fn new(
        nav_timeout: Duration,
        ready_timeout: Duration,
        stall_timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self> {
        let mut client_builder = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .connect_timeout(nav_timeout);

        if let Some(proxy_url) = proxy {
            client_builder = client_builder
                .proxy(reqwest::Proxy::all(proxy_url).context("Invalid proxy URL")?);
        }

        let client = client_builder
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            nav_timeout,
            ready_timeout,
            stall_timeout,
        })
    }
}

#[async_trait]
impl Browser for HttpClient {
    async fn open(&self, url: &Url) -> Result<RawPage, NavigationError> {
        let no_route = |e: reqwest::Error| NavigationError::Unreachable {
            url: url.to_string(),
            message: e.to_string(),
        };

        let request = self.client.get(url.clone()).send();
        let mut response = match tokio::time::timeout(self.nav_timeout, request).await {
            Ok(result) => result.map_err(no_route)?,
            Err(_) => {
                return Err(NavigationError::Timeout {
                    url: url.to_string(),
                    after: self.nav_timeout,
                });
            }
        };

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let ready_by = Instant::now() + self.ready_timeout;

        let mut body = Vec::new();
        let mut complete = true;
        loop {
            match tokio::time::timeout_at(ready_by, response.chunk()).await {
                Ok(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
                Ok(Ok(None)) => break,
                Ok(Err(e)) if body.is_empty() => return Err(no_route(e)),
                Ok(Err(_)) | Err(_) => {
                    complete = false;
                    break;
                }
            }
        }

        Ok(RawPage {
            final_url,
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            complete,
        })
    }
}

#[async_trait]
impl MediaSource for HttpClient {
    async fn fetch_to(&self, url: &Url, sink: &mut MediaSink) -> Result<u64, DownloadError> {
        let network = |e: reqwest::Error| DownloadError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };
        let stalled = |_| DownloadError::Network {
            url: url.to_string(),
            message: format!("no data for {:?}", self.stall_timeout),
        };

        let request = self.client.get(url.clone()).send();
        let mut response = tokio::time::timeout(self.stall_timeout, request)
            .await
            .map_err(stalled)?
            .map_err(network)?;

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        sink.expect_length(response.content_length());

        loop {
            let next = tokio::time::timeout(self.stall_timeout, response.chunk())
                .await
                .map_err(stalled)?;
            let Some(chunk) = next.map_err(network)? else {
                break;
            };
            if chunk.is_empty() {
                break;
            }
            sink.write_chunk(&chunk)?;
        }

        Ok(sink.written())
    }
}
