use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::error::NavigationError;
use crate::matcher::discover_urls;
use crate::models::{PageContent, PageResult};

/// What a browsing backend hands back for one navigation.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub final_url: Url,
    pub status: u16,
    pub body: String,
    /// False when the backend stopped waiting before the page was ready.
    pub complete: bool,
}

/// Page navigation capability. Implemented by the HTTP client and by test
/// fakes; a headless browser binding would slot in here too.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, url: &Url) -> Result<RawPage, NavigationError>;
}

/// The single browsing session of a scrape run. Only this type navigates.
pub struct PageFetcher {
    browser: Arc<dyn Browser>,
    deadline: Duration,
    current: Option<PageContent>,
}

impl PageFetcher {
    /// `deadline` bounds a whole navigation including the readiness wait.
    pub fn new(browser: Arc<dyn Browser>, deadline: Duration) -> Self {
        Self {
            browser,
            deadline,
            current: None,
        }
    }

    pub async fn load(&mut self, url: &Url) -> Result<PageResult, NavigationError> {
        debug!("Loading {}", url);
        let raw = match tokio::time::timeout(self.deadline, self.browser.open(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(NavigationError::Timeout {
                    url: url.to_string(),
                    after: self.deadline,
                });
            }
        };

        if !raw.complete {
            warn!("Content loading timeout on {}, scanning what arrived", url);
        }
        if !(200..300).contains(&raw.status) {
            warn!("{} answered HTTP {}", raw.final_url, raw.status);
        }

        let content = PageContent::new(raw.final_url.clone(), raw.body);
        let candidates = discover_urls(&content);
        self.current = Some(content.clone());

        Ok(PageResult {
            requested: url.clone(),
            url: raw.final_url,
            status: raw.status,
            complete: raw.complete,
            content,
            candidates,
        })
    }

    pub fn current_content(&self) -> Option<&PageContent> {
        self.current.as_ref()
    }
}
