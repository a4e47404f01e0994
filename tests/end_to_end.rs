use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use media_scrape::{
    Browser, DownloadError, MediaSink, MediaSource, NavigationError, RawPage, ScrapeConfig,
    Scraper, SessionOptions, SessionOutcome,
};
use tempfile::TempDir;
use url::Url;

#[derive(Default)]
struct Site {
    pages: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl Browser for Site {
    async fn open(&self, url: &Url) -> Result<RawPage, NavigationError> {
        let body = self
            .pages
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| NavigationError::Unreachable {
                url: url.to_string(),
                message: "no such page".into(),
            })?;
        Ok(RawPage {
            final_url: url.clone(),
            status: 200,
            body,
            complete: true,
        })
    }
}

#[async_trait]
impl MediaSource for Site {
    async fn fetch_to(&self, url: &Url, sink: &mut MediaSink) -> Result<u64, DownloadError> {
        self.fetched.lock().unwrap().push(url.to_string());
        let bytes = self
            .files
            .get(url.as_str())
            .ok_or_else(|| DownloadError::Status {
                url: url.to_string(),
                status: 404,
            })?;
        sink.write_chunk(bytes)?;
        Ok(sink.written())
    }
}

fn example_site() -> Site {
    let mut site = Site::default();
    site.pages.insert(
        "http://example.test/page1".into(),
        r#"<html><body>
             <a href="a.mp4">A</a>
             <a href="b.webm">B</a>
             <a href="http://example.test/page2">Next</a>
           </body></html>"#
            .into(),
    );
    site.pages.insert(
        "http://example.test/page2".into(),
        r#"<html><body><a href="c.mp4">C</a></body></html>"#.into(),
    );
    site.files
        .insert("http://example.test/a.mp4".into(), b"first video".to_vec());
    site.files
        .insert("http://example.test/b.webm".into(), b"webm".to_vec());
    site.files
        .insert("http://example.test/c.mp4".into(), b"second video".to_vec());
    site
}

#[tokio::test]
async fn two_page_walk_downloads_only_matching_files() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let site = Arc::new(example_site());

    let config = ScrapeConfig::new(
        "http://example.test/page1",
        ["mp4"],
        ["Next"],
        false,
        &out,
    )
    .unwrap();
    let options = SessionOptions {
        page_delay: Duration::ZERO,
        show_progress: false,
        ..SessionOptions::default()
    };

    let mut scraper = Scraper::new(site.clone(), site.clone(), options);
    scraper.start(config).unwrap();
    let state = scraper.wait().await;

    let mut files: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["a.mp4", "c.mp4"]);
    assert_eq!(fs::read(out.join("c.mp4")).unwrap(), b"second video");
    assert!(!site
        .fetched
        .lock()
        .unwrap()
        .iter()
        .any(|u| u.ends_with("b.webm")));

    assert!(!state.running);
    assert_eq!(state.outcome, Some(SessionOutcome::Completed));
    assert_eq!(state.page_index, 2);
    assert_eq!(state.items_found, 2);
    assert_eq!(state.items_downloaded, 2);
    assert_eq!(state.items_failed, 0);

    let page_visits = scraper
        .logs()
        .iter()
        .filter(|line| line.message.starts_with("Page "))
        .count();
    assert_eq!(page_visits, 2);
}
