use crate::error::{Result, ScrapeError};
use crate::heuristics::{extract_price, extract_surface, first_match};
use crate::models::{RawListing, Source};
use crate::scrapers::dom::{card_selector, element_text, field_selector, resolve_url, select_first};
use crate::scrapers::fetcher::RenderedPage;
use crate::scrapers::traits::{FetchProfile, SourceAdapter};
use scraper::{ElementRef, Html};
use std::time::Duration;
use tracing::{debug, info};

const CARD: &str = "div.card.col";
const TITLE_LINK: &str = "p.title a";
const IMAGE: &str = ".avatar img";
const BADGE: &str = "span.badge";
const PARAGRAPH: &str = "p";

/// ImmoJeune listing pages: one `div.card.col` per ad, housing type as badges,
/// price and surface somewhere in the card's paragraphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmoJeuneAdapter;

impl SourceAdapter for ImmoJeuneAdapter {
    fn source(&self) -> Source {
        Source::ImmoJeune
    }

    fn fetch_profile(&self) -> FetchProfile {
        FetchProfile {
            consent_selector: Some("button[data-cookiefirst-action='accept']"),
            ready_selector: Some(CARD),
            scroll_rounds: 4,
            scroll_pause: Duration::from_secs(2),
            wait_timeout: Duration::from_secs(15),
        }
    }

    fn extract_candidates(&self, page: &RenderedPage, city: &str) -> Result<Vec<RawListing>> {
        let document = Html::parse_document(&page.html);
        let selector = card_selector(Source::ImmoJeune, CARD)?;

        let cards: Vec<_> = document.select(&selector).collect();
        if cards.is_empty() {
            return Err(ScrapeError::CardStructure {
                site: Source::ImmoJeune,
                message: format!("no '{}' on {}", CARD, page.url),
            });
        }
        info!("Found {} ImmoJeune cards on {}", cards.len(), page.url);

        let candidates: Vec<RawListing> = cards
            .into_iter()
            .enumerate()
            .filter_map(|(idx, card)| {
                let raw = parse_card(card, &page.url, city);
                if raw.is_none() {
                    debug!("Skipped ImmoJeune card {}: no title link", idx);
                }
                raw
            })
            .collect();

        Ok(candidates)
    }
}

fn parse_card(card: ElementRef<'_>, page_url: &str, city: &str) -> Option<RawListing> {
    // Title link doubles as the ad's identity
    let link = select_first(card, TITLE_LINK)?;
    let title = element_text(link);
    let detail_url = link
        .value()
        .attr("href")
        .and_then(|href| resolve_url(page_url, href))?;
    if title.is_empty() {
        return None;
    }

    let mut raw = RawListing::new(Source::ImmoJeune, city);
    raw.title = Some(title);
    raw.detail_url = Some(detail_url);
    raw.image_url = select_first(card, IMAGE).and_then(|img| {
        let src = img.value().attr("src").or_else(|| img.value().attr("data-src"))?;
        resolve_url(page_url, src)
    });

    if let Some(badge) = field_selector(BADGE) {
        raw.type_badge_texts = card
            .select(&badge)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect();
    }

    // Price and surface are taken from the first paragraph, in card order,
    // that yields a value
    let paragraphs: Vec<String> = field_selector(PARAGRAPH)
        .map(|p| card.select(&p).map(element_text).collect())
        .unwrap_or_default();
    let fragments = || paragraphs.iter().map(String::as_str);

    raw.price_text = first_match(fragments(), extract_price).map(|(text, _)| text.to_string());
    raw.surface_text = first_match(fragments(), extract_surface).map(|(text, _)| text.to_string());

    Some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "https://www.immojeune.com/logement-etudiant/lyon-69.html";

    fn page(body: &str) -> RenderedPage {
        RenderedPage {
            url: PAGE_URL.to_string(),
            html: format!("<html><body><div class=\"row\">{}</div></body></html>", body),
        }
    }

    const STUDIO_CARD: &str = r#"
        <div class="card col">
          <div class="avatar"><img src="/media/annonce/4521.jpg"></div>
          <span class="badge">Meublé</span>
          <span class="badge">Studio</span>
          <p class="title"><a href="/location-studio/lyon-4521.html">Studio centre-ville</a></p>
          <p>Lyon 3e</p>
          <p>18 m²
             Disponible</p>
          <p>420 € /mois</p>
          <p>Dépôt 840 €</p>
        </div>"#;

    #[test]
    fn extracts_complete_card() {
        let candidates = ImmoJeuneAdapter
            .extract_candidates(&page(STUDIO_CARD), "Lyon")
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let raw = &candidates[0];
        assert_eq!(raw.title.as_deref(), Some("Studio centre-ville"));
        assert_eq!(
            raw.detail_url.as_deref(),
            Some("https://www.immojeune.com/location-studio/lyon-4521.html")
        );
        assert_eq!(
            raw.image_url.as_deref(),
            Some("https://www.immojeune.com/media/annonce/4521.jpg")
        );
        assert_eq!(raw.type_badge_texts, vec!["Meublé", "Studio"]);
        assert_eq!(raw.price_text.as_deref(), Some("420 € /mois"));
        assert_eq!(raw.surface_text.as_deref(), Some("18 m² Disponible"));
        assert_eq!(raw.city, "Lyon");
        assert_eq!(raw.source, Source::ImmoJeune);
    }

    #[test]
    fn missing_fields_stay_absent() {
        let card = r#"
            <div class="card col">
              <p class="title"><a href="https://www.immojeune.com/a/1.html">Chambre</a></p>
              <p>Prix sur demande</p>
            </div>"#;
        let candidates = ImmoJeuneAdapter.extract_candidates(&page(card), "Paris").unwrap();

        assert_eq!(candidates.len(), 1);
        let raw = &candidates[0];
        assert_eq!(raw.image_url, None);
        assert!(raw.type_badge_texts.is_empty());
        assert_eq!(raw.price_text, None);
        assert_eq!(raw.surface_text, None);
    }

    #[test]
    fn cards_without_title_link_are_skipped() {
        let body = format!(
            r#"<div class="card col"><p>350 €</p><p>20 m²</p></div>
               <div class="card col"><p class="title"><a>No link</a></p></div>
               {}"#,
            STUDIO_CARD
        );
        let candidates = ImmoJeuneAdapter.extract_candidates(&page(&body), "Lyon").unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn missing_card_collection_is_a_structure_fault() {
        let err = ImmoJeuneAdapter
            .extract_candidates(&page("<p>Aucune annonce</p>"), "Lyon")
            .unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::CardStructure { site: Source::ImmoJeune, .. }
        ));
    }
}
