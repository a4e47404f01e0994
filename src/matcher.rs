//! Finds media URLs in page content.
//!
//! Matching is by the suffix of the URL's path, compared case-insensitively
//! against the configured extensions. Query strings and fragments never take
//! part in the comparison.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;
use url::Url;

use crate::models::{MediaItem, PageContent};

/// Attributes that may carry a media URL, checked in this order per element.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "data-src", "data-url", "data-video"];

static SCRIPT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>\\`]+"#).expect("static regex")
});

/// Every absolute http(s) URL in the page, in document order of first
/// occurrence, without fragments.
pub fn discover_urls(content: &PageContent) -> Vec<Url> {
    let document = content.document();
    let base = content.base_url(&document);

    let Ok(selector) = Selector::parse("[href], [src], [data-src], [data-url], [data-video], script")
    else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    let mut push = |url: Url| {
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    };

    for element in document.select(&selector) {
        if element.value().name() == "script" {
            let text: String = element.text().collect();
            for url in script_urls(&text) {
                push(url);
            }
        }

        for attr in URL_ATTRIBUTES {
            if let Some(value) = element.value().attr(attr) {
                if let Some(url) = resolve(&base, value) {
                    push(url);
                }
            }
        }
    }

    urls
}

/// Keeps the candidates whose path ends in one of `extensions`.
pub fn select_media(candidates: &[Url], extensions: &BTreeSet<String>, page: u32) -> Vec<MediaItem> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|url| has_extension(url, extensions))
        .filter(|url| seen.insert((*url).clone()))
        .map(|url| MediaItem::new(url.clone(), page))
        .collect()
}

/// Media items in `content`, in document order, each URL once.
pub fn match_media(content: &PageContent, extensions: &BTreeSet<String>, page: u32) -> Vec<MediaItem> {
    select_media(&discover_urls(content), extensions, page)
}

pub fn has_extension(url: &Url, extensions: &BTreeSet<String>) -> bool {
    let Some(segment) = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
    else {
        return false;
    };

    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => extensions.contains(&ext.to_ascii_lowercase()),
        _ => false,
    }
}

/// Resolves an attribute value against the base URL. Anchors, scripts and
/// non-web schemes yield nothing.
pub(crate) fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn script_urls(text: &str) -> Vec<Url> {
    let unescaped = text.replace("\\/", "/");
    SCRIPT_URL
        .find_iter(&unescaped)
        .filter_map(|m| Url::parse(m.as_str().trim_end_matches([',', ';', ')'])).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}
