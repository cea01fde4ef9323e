pub mod dom;
pub mod fetcher;
pub mod immojeune;
pub mod studapart;
pub mod traits;

pub use fetcher::{BrowserFetcher, FetcherFactory, HttpFetcher, PageFetcher, RenderedPage};
pub use immojeune::ImmoJeuneAdapter;
pub use studapart::StudapartAdapter;
pub use traits::{FetchProfile, SourceAdapter};

use crate::models::Source;

/// The adapter that knows how to read `source`'s listing pages
pub fn adapter_for(source: Source) -> &'static dyn SourceAdapter {
    match source {
        Source::ImmoJeune => &ImmoJeuneAdapter,
        Source::Studapart => &StudapartAdapter,
    }
}
