use crate::error::{Result, ScrapeError};
use crate::models::Source;
use scraper::{ElementRef, Selector};
use tracing::debug;
use url::Url;

/// Selector for the repeated card element. A bad selector here means the
/// adapter cannot work at all, so it is a structure fault.
pub fn card_selector(site: Source, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScrapeError::CardStructure {
        site,
        message: format!("invalid card selector '{}': {}", css, e),
    })
}

/// Selector for a single field; failure only costs that field.
pub fn field_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            debug!("Invalid field selector '{}': {}", css, e);
            None
        }
    }
}

/// First descendant matching `css`
pub fn select_first<'a>(element: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = field_selector(css)?;
    element.select(&selector).next()
}

/// Rendered-ish text of an element: text nodes joined, whitespace (line
/// breaks, non-breaking spaces) collapsed to single spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trimmed text of the first match, absent when missing or blank
pub fn text_of(element: ElementRef<'_>, css: &str) -> Option<String> {
    let text = element_text(select_first(element, css)?);
    (!text.is_empty()).then_some(text)
}

/// Resolves an `href`/`src` against the page URL
pub fn resolve_url(base: &str, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() || link.starts_with("data:") {
        return None;
    }
    match Url::parse(base).and_then(|base| base.join(link)) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(link).ok().map(|u| u.to_string()),
    }
}
