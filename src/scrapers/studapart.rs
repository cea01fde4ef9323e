#![allow(clippy::expect_used)]

use crate::error::Result;
use crate::heuristics::{extract_price, extract_surface, first_match, infer_housing_type};
use crate::models::{RawListing, Source};
use crate::scrapers::dom::{card_selector, resolve_url, select_first, text_of};
use crate::scrapers::fetcher::RenderedPage;
use crate::scrapers::traits::{FetchProfile, SourceAdapter};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

const CARD: &str = "a.AccomodationBlock";
const TITLE: &str = "p.AccomodationBlock_title";
const IMAGE: &str = ".SliderSimple_imageBackground";
const PRICE_AMOUNT: &str = "p.ft-l b";
const PRICE_LINE: &str = "p.ft-l";
const DETAILS: &str = "div.AccomodationBlock_location.mb-10";

/// `background-image: url("…")` in an inline style
static STYLE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*["']?([^"')]+)["']?\s*\)"#).expect("STYLE_URL regex")
});

/// Studapart listing pages: each card is itself the link to the ad, the
/// housing type is only spelled out in the title and details line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StudapartAdapter;

impl SourceAdapter for StudapartAdapter {
    fn source(&self) -> Source {
        Source::Studapart
    }

    fn fetch_profile(&self) -> FetchProfile {
        FetchProfile {
            consent_selector: Some(".didomi-continue-without-agreeing"),
            ready_selector: None,
            scroll_rounds: 8,
            scroll_pause: Duration::from_secs(2),
            wait_timeout: Duration::from_secs(20),
        }
    }

    /// An empty result page is a normal outcome here, not a structure fault.
    fn extract_candidates(&self, page: &RenderedPage, city: &str) -> Result<Vec<RawListing>> {
        let document = Html::parse_document(&page.html);
        let selector = card_selector(Source::Studapart, CARD)?;

        let cards: Vec<_> = document.select(&selector).collect();
        info!("Found {} Studapart cards on {}", cards.len(), page.url);

        let candidates: Vec<RawListing> = cards
            .into_iter()
            .enumerate()
            .filter_map(|(idx, card)| {
                let raw = parse_card(card, &page.url, city);
                if raw.is_none() {
                    debug!("Skipped Studapart card {}: no title or href", idx);
                }
                raw
            })
            .collect();

        Ok(candidates)
    }
}

fn parse_card(card: ElementRef<'_>, page_url: &str, city: &str) -> Option<RawListing> {
    let title = text_of(card, TITLE)?;
    let detail_url = card
        .value()
        .attr("href")
        .and_then(|href| resolve_url(page_url, href))?;

    let mut raw = RawListing::new(Source::Studapart, city);
    raw.image_url = select_first(card, IMAGE)
        .and_then(|el| el.value().attr("style"))
        .and_then(|style| STYLE_URL.captures(style))
        .and_then(|caps| caps.get(1))
        .and_then(|m| resolve_url(page_url, m.as_str()));

    // The amount element often drops the currency sign; the full line keeps it
    let price_fragments: Vec<String> = [
        text_of(card, PRICE_AMOUNT).map(|amount| with_currency(&amount)),
        text_of(card, PRICE_LINE),
    ]
    .into_iter()
    .flatten()
    .collect();
    raw.price_text = first_match(price_fragments.iter().map(String::as_str), |text| {
        extract_price(text).filter(|price| *price > 0)
    })
    .map(|(text, _)| text.to_string());

    let details = text_of(card, DETAILS);
    raw.surface_text = details
        .as_deref()
        .and_then(|text| extract_surface(text).map(|_| text.to_string()));

    if let Some(ty) = infer_housing_type(&title, details.as_deref().unwrap_or_default()) {
        raw.type_badge_texts.push(ty.as_str().to_string());
    }

    raw.title = Some(title);
    raw.detail_url = Some(detail_url);
    Some(raw)
}

fn with_currency(amount: &str) -> String {
    if amount.contains('€') {
        amount.to_string()
    } else {
        format!("{} €", amount)
    }
}
