//! Parsing of free-form listing text into typed fields.
//!
//! Listing cards are written by humans: "30 à 40 m²", "1 200€ /mois",
//! "Studio meublé". Everything here is a pure function so the same text
//! always yields the same value, at scrape time and at query time.

#![allow(clippy::expect_used)]

use std::sync::LazyLock;

use regex::Regex;

use crate::models::HousingType;

/// Surfaces above this are presumed non-residential or misparsed.
pub const MAX_SURFACE: f64 = 80.0;

/// `<number>[ à|to <number>] m2`, run after decimal-comma and unit normalization.
static SURFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(?:(?:à|to)\s*(\d+(?:\.\d+)?))?\s*m2").expect("SURFACE regex")
});

/// Digits, optionally space-grouped, directly followed by the euro sign.
static PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d\s]*)\s*€").expect("PRICE regex"));

/// Room counts spelled out in a details line, checked in this order.
const ROOM_KEYWORDS: [(&str, HousingType); 3] = [
    ("1 chambre", HousingType::T1),
    ("2 chambres", HousingType::T2),
    ("3 chambres", HousingType::T3),
];

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Maps badge text to a housing type.
///
/// Substrings are tested in the fixed order STUDIO, T1, T2, T3 and the first
/// hit wins, so "T12" is a T1. Non-empty text matching none of them comes back
/// as `HousingType::Other` carrying the uppercased input.
pub fn normalize_housing_type(text: &str) -> Option<HousingType> {
    let upper = text.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    let ty = if upper.contains("STUDIO") {
        HousingType::Studio
    } else if upper.contains("T1") {
        HousingType::T1
    } else if upper.contains("T2") {
        HousingType::T2
    } else if upper.contains("T3") {
        HousingType::T3
    } else {
        HousingType::Other(upper)
    };
    Some(ty)
}

/// Infers a housing type from a card's title and details line.
///
/// "studio" counts in either text and beats any room count. Room counts
/// ("1 chambre", "2 chambres", "3 chambres") are only read from the details
/// line.
pub fn infer_housing_type(title: &str, details: &str) -> Option<HousingType> {
    let title = title.to_lowercase();
    let details = details.to_lowercase();
    if title.contains("studio") || details.contains("studio") {
        return Some(HousingType::Studio);
    }
    ROOM_KEYWORDS
        .iter()
        .find(|(keyword, _)| details.contains(keyword))
        .map(|(_, ty)| ty.clone())
}

/// Extracts a surface in square meters.
///
/// A range ("30 à 40 m2") resolves to the mean of its bounds. Values above
/// [`MAX_SURFACE`] are discarded.
pub fn extract_surface(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    let normalized = text.to_lowercase().replace(',', ".").replace("m²", "m2");
    let caps = SURFACE.captures(&normalized)?;
    let low: f64 = caps.get(1)?.as_str().parse().ok()?;
    let surface = match caps.get(2) {
        Some(high) => (low + high.as_str().parse::<f64>().ok()?) / 2.0,
        None => low,
    };
    let surface = round2(surface);
    (surface <= MAX_SURFACE).then_some(surface)
}

/// Extracts a whole-euro price ("450 €", "1 200€ /mois").
pub fn extract_price(text: &str) -> Option<i64> {
    let caps = PRICE.captures(text)?;
    let digits: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    digits.parse().ok()
}

/// Scans fragments in priority order and returns the first one `parse` accepts,
/// together with the parsed value. Later fragments are never looked at.
pub fn first_match<'a, T>(
    fragments: impl IntoIterator<Item = &'a str>,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<(&'a str, T)> {
    fragments
        .into_iter()
        .find_map(|fragment| parse(fragment).map(|value| (fragment, value)))
}
