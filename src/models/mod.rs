use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source site of a listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    ImmoJeune,
    Studapart,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::ImmoJeune, Source::Studapart];

    /// Label stored in the `site_source` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ImmoJeune => "ImmoJeune",
            Source::Studapart => "Studapart",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immojeune" => Ok(Source::ImmoJeune),
            "studapart" => Ok(Source::Studapart),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

/// Coarse housing category.
///
/// `Other` keeps the uppercased text of an unrecognized badge (e.g. "T4",
/// "CHAMBRE"). It is never considered complete by the normalization stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HousingType {
    Studio,
    T1,
    T2,
    T3,
    Other(String),
}

impl HousingType {
    pub fn as_str(&self) -> &str {
        match self {
            HousingType::Studio => "STUDIO",
            HousingType::T1 => "T1",
            HousingType::T2 => "T2",
            HousingType::T3 => "T3",
            HousingType::Other(raw) => raw,
        }
    }

    /// One of STUDIO/T1/T2/T3
    pub fn is_recognized(&self) -> bool {
        !matches!(self, HousingType::Other(_))
    }

    /// Exact decoding of a stored code. Unlike `heuristics::normalize_housing_type`
    /// no substring search happens here.
    pub fn from_code(code: &str) -> Self {
        match code {
            "STUDIO" => HousingType::Studio,
            "T1" => HousingType::T1,
            "T2" => HousingType::T2,
            "T3" => HousingType::T3,
            other => HousingType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HousingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for HousingType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HousingType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(HousingType::from_code(&code))
    }
}

/// One configured fetch target: a listing page of a site for a given city
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub url: String,
    pub city: String,
    pub source: Source,
}

impl Zone {
    pub fn new(url: impl Into<String>, city: impl Into<String>, source: Source) -> Self {
        Self {
            url: url.into(),
            city: city.into(),
            source,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.source, self.city, self.url)
    }
}

/// Candidate record produced by a source adapter, before any validation.
///
/// `price_text` and `surface_text` hold the winning fragment of the card's
/// priority-ordered fragment list, not the parsed value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub surface_text: Option<String>,
    pub type_badge_texts: Vec<String>,
    pub image_url: Option<String>,
    pub detail_url: Option<String>,
    pub source: Source,
    pub city: String,
}

impl RawListing {
    pub fn new(source: Source, city: impl Into<String>) -> Self {
        Self {
            title: None,
            price_text: None,
            surface_text: None,
            type_badge_texts: Vec::new(),
            image_url: None,
            detail_url: None,
            source,
            city: city.into(),
        }
    }
}

/// Canonical listing as persisted in the `logements` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    /// Surrogate key, `None` until stored
    pub id: Option<i64>,
    pub title: String,
    pub price: i64,
    pub surface: f64,
    pub price_per_area: f64,
    pub housing_type: HousingType,
    pub city: String,
    pub source: Source,
    pub image_url: Option<String>,
    pub listing_url: String,
    pub scraped_at: DateTime<Utc>,
}
