use crate::error::Result;
use crate::models::{RawListing, Source};
use crate::scrapers::fetcher::RenderedPage;
use std::time::Duration;

/// How a site's listing page must be driven before its cards are all in the DOM
#[derive(Debug, Clone, PartialEq)]
pub struct FetchProfile {
    /// Consent button clicked if it shows up within `wait_timeout`
    pub consent_selector: Option<&'static str>,
    /// Element that must be present before scrolling; missing means fetch fault
    pub ready_selector: Option<&'static str>,
    /// Scroll-to-bottom rounds for lazily loaded cards
    pub scroll_rounds: u32,
    pub scroll_pause: Duration,
    pub wait_timeout: Duration,
}

/// Common trait for all listing sites.
/// New sites are added by implementing this and registering them in `adapter_for`.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn fetch_profile(&self) -> FetchProfile;

    /// Turns a rendered listing page into one raw candidate per usable card.
    ///
    /// Cards without a title and detail link are skipped; any other field
    /// that cannot be read is left absent. Fails only when the card
    /// collection itself cannot be located.
    fn extract_candidates(&self, page: &RenderedPage, city: &str) -> Result<Vec<RawListing>>;
}
