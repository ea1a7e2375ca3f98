use scraper::{Html, Selector};
use url::Url;

use crate::entry::FeedEntry;
use crate::error::ParseError;

use super::{resolve_url, Parsed};

/// HTML extraction with CSS selectors. `select` matches entry elements: the
/// element's own href (or its first descendant anchor's) becomes the long
/// URL and its text the title. `follow` matches anchors whose hrefs are
/// fetched as secondary URLs. Relative hrefs resolve against the page URL.
pub fn parse(
    select: &str,
    follow: Option<&str>,
    base: Option<&Url>,
    content: &[u8],
) -> Result<Parsed, ParseError> {
    let document = Html::parse_document(&String::from_utf8_lossy(content));
    let entry_selector = compile(select)?;
    let anchor_selector = compile("a[href]")?;

    let mut entries = Vec::new();
    for element in document.select(&entry_selector) {
        let href = element
            .value()
            .attr("href")
            .or_else(|| {
                element
                    .select(&anchor_selector)
                    .next()
                    .and_then(|a| a.value().attr("href"))
            });
        let Some(href) = href else { continue };
        let title = normalize(element.text().collect::<String>().as_str());
        entries.push(FeedEntry {
            title,
            long_url: resolve_url(base, href),
            ..FeedEntry::default()
        });
    }

    let mut follow_urls = Vec::new();
    if let Some(follow) = follow {
        let follow_selector = compile(follow)?;
        for element in document.select(&follow_selector) {
            if let Some(href) = element.value().attr("href") {
                follow_urls.push(resolve_url(base, href));
            }
        }
    }
    Ok(Parsed {
        entries,
        follow_urls,
    })
}

fn compile(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|err| ParseError::Selector(format!("{selector:?}: {err}")))
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
