use crate::error::{Result, ScrapeError};
use crate::models::{Listing, Source, Zone};
use crate::normalize::normalize;
use crate::scrapers::{adapter_for, FetcherFactory};
use crate::storage::ListingStore;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// A zone whose contribution was lost
#[derive(Debug)]
pub struct ZoneFault {
    pub zone: Zone,
    pub error: ScrapeError,
}

/// Outcome of one pipeline run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Cards that produced a raw candidate
    pub candidates: usize,
    /// Listings kept after normalization and dedup
    pub count: usize,
    /// Candidates rejected by normalization
    pub dropped: usize,
    /// Listings already seen in an earlier zone
    pub duplicates: usize,
    pub per_source_count: BTreeMap<Source, usize>,
    pub faults: Vec<ZoneFault>,
}

struct ZoneHarvest {
    candidates: usize,
    listings: Vec<Listing>,
}

/// Fetch → extract → normalize over every zone, then one atomic replace.
pub struct Pipeline {
    factory: Arc<dyn FetcherFactory>,
    concurrency: usize,
    zone_timeout: Duration,
}

impl Pipeline {
    pub fn new(factory: Arc<dyn FetcherFactory>, concurrency: usize, zone_timeout: Duration) -> Self {
        Self {
            factory,
            concurrency: concurrency.max(1),
            zone_timeout,
        }
    }

    /// Scrapes all zones, at most `concurrency` at a time.
    ///
    /// A failing zone is recorded in the report and contributes nothing;
    /// listings are merged in zone order and deduplicated by listing URL.
    pub async fn collect(&self, zones: &[Zone]) -> (Vec<Listing>, RunReport) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, zone) in zones.iter().cloned().enumerate() {
            let factory = Arc::clone(&self.factory);
            let semaphore = Arc::clone(&semaphore);
            let zone_timeout = self.zone_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                info!("Scraping {}", zone);
                let outcome = scrape_zone(factory.as_ref(), &zone, zone_timeout).await;
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<ZoneHarvest>>> = zones.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => error!("Zone task aborted: {}", e),
            }
        }

        let mut report = RunReport::default();
        let mut seen = HashSet::new();
        let mut listings = Vec::new();

        for (zone, outcome) in zones.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| Err(ScrapeError::fetch(&zone.url, "zone task aborted")));
            match outcome {
                Ok(harvest) => {
                    info!(
                        "{}: {} candidates, {} listings",
                        zone,
                        harvest.candidates,
                        harvest.listings.len()
                    );
                    report.candidates += harvest.candidates;
                    report.dropped += harvest.candidates - harvest.listings.len();
                    for listing in harvest.listings {
                        if !seen.insert(listing.listing_url.clone()) {
                            report.duplicates += 1;
                            continue;
                        }
                        *report.per_source_count.entry(listing.source).or_default() += 1;
                        listings.push(listing);
                    }
                }
                Err(error) => {
                    warn!("Zone failed, skipping {}: {}", zone, error);
                    report.faults.push(ZoneFault {
                        zone: zone.clone(),
                        error,
                    });
                }
            }
        }

        report.count = listings.len();
        (listings, report)
    }

    /// Collects every zone and replaces the stored dataset with the result.
    ///
    /// When every zone failed the stored dataset is left untouched and an
    /// error is returned, so a broken run never reads as "zero listings".
    pub async fn run(&self, zones: &[Zone], store: &ListingStore) -> Result<RunReport> {
        self.run_until(zones, store, std::future::pending()).await
    }

    /// Like `run`, but gives up if `shutdown` resolves while zones are still
    /// being collected. Once the replace has started it always completes.
    pub async fn run_until(
        &self,
        zones: &[Zone],
        store: &ListingStore,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunReport> {
        if zones.is_empty() {
            return Err(ScrapeError::Config("no zones configured".to_string()));
        }

        let (listings, report) = tokio::select! {
            collected = self.collect(zones) => collected,
            _ = shutdown => {
                warn!("Shutdown requested, stored dataset left untouched");
                return Err(ScrapeError::Cancelled);
            }
        };
        if report.faults.len() == zones.len() {
            return Err(ScrapeError::AllZonesFailed { zones: zones.len() });
        }

        // No await point from here on
        store.replace_all(&listings)?;
        info!(
            "Run complete: {} listings stored ({} dropped, {} duplicates, {} zone faults)",
            report.count,
            report.dropped,
            report.duplicates,
            report.faults.len()
        );
        Ok(report)
    }
}

async fn scrape_zone(factory: &dyn FetcherFactory, zone: &Zone, zone_timeout: Duration) -> Result<ZoneHarvest> {
    let adapter = adapter_for(zone.source);
    let profile = adapter.fetch_profile();

    // The fetcher is released when this scope ends, whatever the outcome
    let page = {
        let mut fetcher = factory.create()?;
        match timeout(zone_timeout, fetcher.fetch(zone, &profile)).await {
            Ok(page) => page?,
            Err(_) => {
                // Blocking work of the abandoned fetch must end while the permit is held
                fetcher.release().await;
                return Err(ScrapeError::Timeout {
                    url: zone.url.clone(),
                    secs: zone_timeout.as_secs(),
                })
            }
        }
    };

    let candidates = adapter.extract_candidates(&page, &zone.city)?;
    let scraped_at = Utc::now();
    let listings = candidates
        .iter()
        .filter_map(|raw| normalize(raw, scraped_at))
        .collect();

    Ok(ZoneHarvest {
        candidates: candidates.len(),
        listings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HousingType;
    use crate::scrapers::{FetchProfile, PageFetcher, RenderedPage};
    use crate::storage::ListingQuery;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    const IMMOJEUNE_LYON: &str = r#"<html><body>
        <div class="card col">
          <span class="badge">Studio</span>
          <p class="title"><a href="/location/lyon-1.html">Studio centre-ville</a></p>
          <p>18 m²</p><p>420 €</p>
        </div>
        <div class="card col">
          <span class="badge">T1</span>
          <p class="title"><a href="/location/lyon-2.html">T1 parking</a></p>
          <p>25 m²</p><p>50 €</p>
        </div>
    </body></html>"#;

    const STUDAPART_PARIS: &str = r#"<html><body>
        <a class="AccomodationBlock" href="https://www.studapart.com/fr/paris/9">
          <p class="AccomodationBlock_title">Appartement Bastille</p>
          <div class="AccomodationBlock_location mb-10">Paris · 32 m² · 1 chambre</div>
          <p class="ft-l"><b>950</b> /mois</p>
        </a>
    </body></html>"#;

    struct StaticFetcher {
        pages: Arc<HashMap<String, String>>,
        live: Arc<AtomicUsize>,
    }

    impl Drop for StaticFetcher {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&mut self, zone: &Zone, _profile: &FetchProfile) -> Result<RenderedPage> {
            if zone.url.ends_with("/slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let html = self
                .pages
                .get(&zone.url)
                .ok_or_else(|| ScrapeError::fetch(&zone.url, "status 404"))?;
            Ok(RenderedPage {
                url: zone.url.clone(),
                html: html.clone(),
            })
        }
    }

    /// Renders on a blocking thread that only stops once released, like Chrome
    struct BlockingFetcher {
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        stop: Arc<AtomicBool>,
        work: Option<JoinHandle<()>>,
    }

    #[async_trait]
    impl PageFetcher for BlockingFetcher {
        async fn fetch(&mut self, zone: &Zone, _profile: &FetchProfile) -> Result<RenderedPage> {
            let live = Arc::clone(&self.live);
            let peak = Arc::clone(&self.peak);
            let stop = Arc::clone(&self.stop);
            let work = self.work.insert(tokio::task::spawn_blocking(move || {
                let running = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(running, Ordering::SeqCst);
                let started = std::time::Instant::now();
                while !stop.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(2) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                live.fetch_sub(1, Ordering::SeqCst);
            }));
            let _ = work.await;
            self.work = None;
            Err(ScrapeError::fetch(&zone.url, "page never rendered"))
        }

        async fn release(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(work) = self.work.take() {
                let _ = work.await;
            }
        }
    }

    fn factory(live: Arc<AtomicUsize>) -> Arc<dyn FetcherFactory> {
        let pages: Arc<HashMap<String, String>> = Arc::new(
            [
                ("https://www.immojeune.com/lyon-69.html", IMMOJEUNE_LYON),
                ("https://www.immojeune.com/lille-59.html", "<html><body>Maintenance</body></html>"),
                ("https://www.studapart.com/fr/logement-etudiant-paris", STUDAPART_PARIS),
                ("https://www.studapart.com/fr/logement-etudiant-paris?page=2", STUDAPART_PARIS),
            ]
            .into_iter()
            .map(|(url, html)| (url.to_string(), html.to_string()))
            .collect(),
        );
        Arc::new(move || -> Result<Box<dyn PageFetcher>> {
            live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StaticFetcher {
                pages: Arc::clone(&pages),
                live: Arc::clone(&live),
            }))
        })
    }

    fn zones() -> Vec<Zone> {
        vec![
            Zone::new("https://www.immojeune.com/lyon-69.html", "Lyon", Source::ImmoJeune),
            Zone::new("https://www.studapart.com/fr/logement-etudiant-paris", "Paris", Source::Studapart),
            Zone::new("https://www.studapart.com/fr/logement-etudiant-paris?page=2", "Paris", Source::Studapart),
            Zone::new("https://www.immojeune.com/lille-59.html", "Lille", Source::ImmoJeune),
            Zone::new("https://www.immojeune.com/missing.html", "Nice", Source::ImmoJeune),
        ]
    }

    #[tokio::test]
    async fn collect_merges_zones_and_records_faults() {
        let live = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(factory(Arc::clone(&live)), 2, Duration::from_secs(5));

        let (listings, report) = pipeline.collect(&zones()).await;

        assert_eq!(report.candidates, 4);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.count, 2);
        assert_eq!(report.per_source_count.get(&Source::ImmoJeune), Some(&1));
        assert_eq!(report.per_source_count.get(&Source::Studapart), Some(&1));

        assert_eq!(report.faults.len(), 2);
        assert!(matches!(report.faults[0].error, ScrapeError::CardStructure { .. }));
        assert_eq!(report.faults[0].zone.city, "Lille");
        assert!(matches!(report.faults[1].error, ScrapeError::Fetch { .. }));

        // zone order is kept regardless of completion order
        assert_eq!(listings[0].city, "Lyon");
        assert_eq!(listings[0].price_per_area, 23.33);
        assert_eq!(listings[1].housing_type, HousingType::T1);
        assert_eq!(listings[1].price, 950);

        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_zone_times_out_and_releases_its_fetcher() {
        let live = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(factory(Arc::clone(&live)), 4, Duration::from_millis(50));
        let zones = vec![
            Zone::new("https://www.immojeune.com/slow", "Lyon", Source::ImmoJeune),
            Zone::new("https://www.immojeune.com/lyon-69.html", "Lyon", Source::ImmoJeune),
        ];

        let (listings, report) = pipeline.collect(&zones).await;

        assert_eq!(listings.len(), 1);
        assert_eq!(report.faults.len(), 1);
        assert!(matches!(report.faults[0].error, ScrapeError::Timeout { .. }));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timed_out_blocking_work_ends_before_next_zone_starts() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let factory: Arc<dyn FetcherFactory> = {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            Arc::new(move || -> Result<Box<dyn PageFetcher>> {
                Ok(Box::new(BlockingFetcher {
                    live: Arc::clone(&live),
                    peak: Arc::clone(&peak),
                    stop: Arc::new(AtomicBool::new(false)),
                    work: None,
                }))
            })
        };
        let pipeline = Pipeline::new(factory, 2, Duration::from_millis(30));
        let zones: Vec<Zone> = ["Lyon", "Paris", "Lille", "Nice", "Rennes"]
            .iter()
            .map(|city| Zone::new(format!("https://www.immojeune.com/{}.html", city), *city, Source::ImmoJeune))
            .collect();

        let started = std::time::Instant::now();
        let (listings, report) = pipeline.collect(&zones).await;

        assert!(listings.is_empty());
        assert_eq!(report.faults.len(), 5);
        assert!(report
            .faults
            .iter()
            .all(|fault| matches!(fault.error, ScrapeError::Timeout { .. })));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_replaces_stored_dataset() {
        let live = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(factory(live), 2, Duration::from_secs(5));
        let store = ListingStore::open_in_memory().unwrap();

        let report = pipeline.run(&zones(), &store).await.unwrap();
        assert_eq!(report.count, 2);
        assert_eq!(store.count().unwrap(), 2);

        let lyon = store
            .find(&ListingQuery {
                city: Some("lyon".to_string()),
                ..ListingQuery::default()
            })
            .unwrap();
        assert_eq!(lyon.len(), 1);
        assert_eq!(lyon[0].listing_url, "https://www.immojeune.com/location/lyon-1.html");
    }

    #[tokio::test]
    async fn total_failure_leaves_dataset_untouched() {
        let live = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(factory(live), 2, Duration::from_secs(5));
        let store = ListingStore::open_in_memory().unwrap();
        pipeline.run(&zones(), &store).await.unwrap();

        let broken = vec![Zone::new("https://www.immojeune.com/missing.html", "Nice", Source::ImmoJeune)];
        let err = pipeline.run(&broken, &store).await.unwrap_err();

        assert!(matches!(err, ScrapeError::AllZonesFailed { zones: 1 }));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn shutdown_during_collection_skips_replace() {
        let pipeline = Pipeline::new(factory(Arc::new(AtomicUsize::new(0))), 2, Duration::from_secs(60));
        let store = ListingStore::open_in_memory().unwrap();
        pipeline.run(&zones(), &store).await.unwrap();

        let slow = vec![Zone::new("https://www.immojeune.com/slow", "Lyon", Source::ImmoJeune)];
        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        let err = pipeline.run_until(&slow, &store, shutdown).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Cancelled));
        assert_eq!(store.count().unwrap(), 2);
    }
}
