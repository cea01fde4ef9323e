//! Student housing listings scraped from several rental sites and normalized
//! into one SQLite table.

pub mod config;
pub mod error;
pub mod heuristics;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod scrapers;
pub mod storage;

pub use error::{Result, ScrapeError};
pub use models::{HousingType, Listing, RawListing, Source, Zone};
pub use pipeline::{Pipeline, RunReport};
pub use storage::{ListingQuery, ListingStore, SortKey};
