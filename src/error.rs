//! Error types for the scraping pipeline.
//!
//! Per-field extraction misses are not errors: extractors return `Option` and
//! the field is left absent. Everything here is either zone-level (the zone's
//! contribution is empty, the run goes on) or fatal to the run.

use crate::models::Source;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// Network failure, render failure or expected content never appeared.
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// The card collection could not be located (site layout changed).
    #[error("{site}: card structure not found: {message}")]
    CardStructure { site: Source, message: String },

    /// The zone did not finish within the configured per-zone budget.
    #[error("zone {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// The transactional replace or a read failed.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Every configured zone faulted; nothing worth storing was collected.
    #[error("all {zones} zones failed")]
    AllZonesFailed { zones: usize },

    /// Shutdown was requested before the dataset replace started.
    #[error("run cancelled before storing")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScrapeError {
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ScrapeError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Zone-level faults are recorded in the run report; the others abort the run.
    pub fn is_zone_fault(&self) -> bool {
        matches!(
            self,
            ScrapeError::Fetch { .. } | ScrapeError::CardStructure { .. } | ScrapeError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
