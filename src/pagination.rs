//! Locates the "next page" control and follows it.

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use crate::error::NavigationError;
use crate::fetcher::PageFetcher;
use crate::matcher::resolve;
use crate::models::{PageContent, PageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Selector,
    Attribute,
    ExactText,
    PartialText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextPageRef {
    pub url: Url,
    pub pattern: String,
    pub matched_by: MatchedBy,
}

/// Looks for a next-page control, trying each pattern in order.
///
/// Per pattern, a structural selector is tried first, then `rel`/`class`/`title`
/// attributes on anchors, then anchor text (exact, then contained), all
/// case-insensitive except the selector itself. `None` means this is the last
/// page. Links back to the current page are ignored.
pub fn find_next(content: &PageContent, patterns: &[String]) -> Option<NextPageRef> {
    if patterns.is_empty() {
        return None;
    }

    let document = content.document();
    let base = content.base_url(&document);
    let lookup = Lookup {
        document: &document,
        base: &base,
        current: &content.url,
    };

    patterns.iter().find_map(|pattern| lookup.find(pattern))
}

/// Follows a next-page reference through the fetcher.
pub async fn navigate(
    fetcher: &mut PageFetcher,
    next: &NextPageRef,
) -> Result<PageResult, NavigationError> {
    fetcher.load(&next.url).await
}

struct Lookup<'a> {
    document: &'a Html,
    base: &'a Url,
    current: &'a Url,
}

impl Lookup<'_> {
    fn find(&self, pattern: &str) -> Option<NextPageRef> {
        let hit = |url: Url, matched_by| NextPageRef {
            url,
            pattern: pattern.to_string(),
            matched_by,
        };

        if let Some(url) = self.by_selector(pattern) {
            return Some(hit(url, MatchedBy::Selector));
        }
        if let Some(url) = self.by_attribute(pattern) {
            return Some(hit(url, MatchedBy::Attribute));
        }
        if let Some(url) = self.by_text(pattern, true) {
            return Some(hit(url, MatchedBy::ExactText));
        }
        self.by_text(pattern, false)
            .map(|url| hit(url, MatchedBy::PartialText))
    }

    fn by_selector(&self, pattern: &str) -> Option<Url> {
        let selector = Selector::parse(pattern).ok()?;
        self.document
            .select(&selector)
            .find_map(|element| self.element_target(element))
    }

    fn by_attribute(&self, pattern: &str) -> Option<Url> {
        let value = css_string(&pattern.to_lowercase());
        [
            format!("a[rel~={}]", value),
            format!("a[class*={}]", value),
            format!("a[title*={}]", value),
        ]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            self.document
                .select(&selector)
                .find_map(|anchor| self.href_of(anchor))
        })
    }

    fn by_text(&self, pattern: &str, exact: bool) -> Option<Url> {
        let needle = normalize_text(pattern);
        if needle.is_empty() {
            return None;
        }
        let selector = Selector::parse("a[href]").ok()?;

        self.document.select(&selector).find_map(|anchor| {
            let text = normalize_text(&anchor.text().collect::<String>());
            let matched = if exact {
                text == needle
            } else {
                text.contains(&needle)
            };
            if matched { self.href_of(anchor) } else { None }
        })
    }

    /// The element's own href, else a descendant anchor's, else the closest
    /// enclosing anchor's.
    fn element_target(&self, element: ElementRef<'_>) -> Option<Url> {
        if let Some(url) = self.href_of(element) {
            return Some(url);
        }

        if let Ok(anchors) = Selector::parse("a[href]") {
            if let Some(url) = element.select(&anchors).find_map(|a| self.href_of(a)) {
                return Some(url);
            }
        }

        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == "a")
            .and_then(|a| self.href_of(a))
    }

    fn href_of(&self, element: ElementRef<'_>) -> Option<Url> {
        let url = resolve(self.base, element.value().attr("href")?)?;
        let mut current = self.current.clone();
        current.set_fragment(None);
        (url != current).then_some(url)
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
