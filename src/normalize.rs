//! Raw candidate to canonical listing.
//!
//! The plausibility thresholds below are shared with `storage::ListingStore::find`,
//! which re-applies them to whatever is stored.

use crate::heuristics::{extract_price, extract_surface, normalize_housing_type, round2};
use crate::models::{HousingType, Listing, RawListing};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Prices at or below this are deposits, fees or parsing noise.
pub const MIN_PRICE: i64 = 100;
/// Surfaces at or below this are parking spots, storage or parsing noise.
pub const MIN_SURFACE: f64 = 10.0;
/// Catches swapped price/surface values.
pub const MIN_PRICE_PER_AREA: f64 = 5.0;

/// Picks the housing type from badge texts: the first recognized type wins,
/// otherwise the first non-empty badge as an unrecognized type.
pub fn housing_type_from_badges(badges: &[String]) -> Option<HousingType> {
    let mut types = badges.iter().filter_map(|badge| normalize_housing_type(badge));
    let first = types.next()?;
    if first.is_recognized() {
        return Some(first);
    }
    Some(types.find(HousingType::is_recognized).unwrap_or(first))
}

/// Builds a listing, or `None` when the candidate is incomplete or implausible.
///
/// Pure: the same candidate and timestamp always give the same listing.
/// Price per area is always recomputed from the parsed values.
pub fn normalize(raw: &RawListing, scraped_at: DateTime<Utc>) -> Option<Listing> {
    let Some(title) = raw.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        debug!("Dropped candidate without title");
        return None;
    };
    let Some(listing_url) = raw.detail_url.clone() else {
        debug!("Dropped '{}': no listing URL", title);
        return None;
    };

    let price = raw.price_text.as_deref().and_then(extract_price);
    let surface = raw.surface_text.as_deref().and_then(extract_surface);
    let housing_type = housing_type_from_badges(&raw.type_badge_texts);

    let (price, surface, housing_type) = match (price, surface, housing_type) {
        (Some(price), Some(surface), Some(ty)) if ty.is_recognized() => (price, surface, ty),
        (price, surface, ty) => {
            debug!(
                "Dropped '{}': incomplete (price={:?}, surface={:?}, type={:?})",
                title, price, surface, ty
            );
            return None;
        }
    };

    if price <= MIN_PRICE || surface <= MIN_SURFACE {
        debug!("Dropped '{}': implausible price {} / surface {}", title, price, surface);
        return None;
    }

    let price_per_area = round2(price as f64 / surface);
    if price_per_area <= MIN_PRICE_PER_AREA {
        debug!("Dropped '{}': price per area {} too low", title, price_per_area);
        return None;
    }

    Some(Listing {
        id: None,
        title: title.to_string(),
        price,
        surface,
        price_per_area,
        housing_type,
        city: raw.city.clone(),
        source: raw.source,
        image_url: raw.image_url.clone(),
        listing_url,
        scraped_at,
    })
}
