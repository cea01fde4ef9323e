use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use student_housing_scout::config::{Config, FetcherKind};
use student_housing_scout::scrapers::{BrowserFetcher, FetcherFactory, HttpFetcher, PageFetcher};
use student_housing_scout::{
    Listing, ListingQuery, ListingStore, Pipeline, RunReport, ScrapeError, SortKey, Source,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "housing-scout", about = "Student housing scraper for ImmoJeune and Studapart")]
struct Cli {
    /// SQLite database (default: DATABASE_PATH or data/logements.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured zone and replace the stored listings
    Scrape {
        /// Only scrape zones of this site (immojeune, studapart)
        #[arg(short, long)]
        source: Option<Source>,
        /// Write the resulting listings to this JSON file
        #[arg(short, long)]
        export: Option<PathBuf>,
        /// Scrape and report without touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Search the stored listings
    Search {
        /// Part of the city name, case-insensitive
        #[arg(short, long)]
        city: Option<String>,
        /// Minimum surface in m²
        #[arg(long)]
        min_surface: Option<f64>,
        /// STUDIO, T1, T2 or T3
        #[arg(short = 't', long = "type")]
        housing_type: Option<String>,
        /// Maximum monthly price in €
        #[arg(long)]
        max_price: Option<i64>,
        #[arg(long, value_enum, default_value_t = SortArg::PricePerArea)]
        sort: SortArg,
    },
    /// List configured zones
    Zones,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Price,
    PricePerArea,
}

impl From<SortArg> for SortKey {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Price => SortKey::Price,
            SortArg::PricePerArea => SortKey::PricePerArea,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path.clone());

    match cli.command {
        Commands::Scrape {
            source,
            export,
            dry_run,
        } => scrape(&config, &db_path, source, export.as_deref(), dry_run).await,
        Commands::Search {
            city,
            min_surface,
            housing_type,
            max_price,
            sort,
        } => {
            let store = open_store(&db_path)?;
            let query = ListingQuery {
                city,
                min_surface,
                housing_type,
                max_price,
                sort: sort.into(),
            };
            let listings = store.find(&query)?;
            if listings.is_empty() {
                println!("No listings match these criteria.");
            } else {
                println!("{} listings found\n", listings.len());
                print_listings(&listings);
            }
            Ok(())
        }
        Commands::Zones => {
            for zone in &config.zones {
                println!("{:<10} {:<10} {}", zone.source, zone.city, zone.url);
            }
            Ok(())
        }
    }
}

async fn scrape(
    config: &Config,
    db_path: &Path,
    source: Option<Source>,
    export: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let zones = config.zones_for(source);
    info!("🏠 Housing Scout - {} zones", zones.len());

    let pipeline = Pipeline::new(fetcher_factory(config)?, config.concurrency, config.zone_timeout);

    if dry_run {
        let (listings, report) = tokio::select! {
            collected = pipeline.collect(&zones) => collected,
            _ = shutdown_signal() => {
                warn!("Interrupted");
                return Ok(());
            }
        };
        print_report(&report);
        if let Some(path) = export {
            export_listings(path, &listings).await?;
        }
        return Ok(());
    }

    let store = open_store(db_path)?;
    let report = match pipeline.run_until(&zones, &store, shutdown_signal()).await {
        Ok(report) => report,
        Err(ScrapeError::Cancelled) => {
            warn!("Interrupted before storing, database unchanged");
            return Ok(());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Scrape run failed, database unchanged")),
    };
    print_report(&report);
    info!("💾 Saved {} listings to {}", report.count, db_path.display());

    if let Some(path) = export {
        let stored = store.find(&ListingQuery::default())?;
        export_listings(path, &stored).await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    until_signal(tokio::signal::ctrl_c()).await
}

/// Resolves when `signal` fires. If the handler could not be installed the
/// run goes on without one instead of reading as an immediate interrupt.
async fn until_signal(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn fetcher_factory(config: &Config) -> anyhow::Result<Arc<dyn FetcherFactory>> {
    let factory: Arc<dyn FetcherFactory> = match config.fetcher {
        FetcherKind::Browser => {
            let headless = config.headless;
            let debug_dir = config.debug_dir.clone();
            let budget = config.zone_timeout;
            Arc::new(move || -> student_housing_scout::Result<Box<dyn PageFetcher>> {
                Ok(Box::new(BrowserFetcher::new(headless, debug_dir.clone(), budget)))
            })
        }
        FetcherKind::Http => {
            let fetcher = HttpFetcher::new()?;
            Arc::new(move || -> student_housing_scout::Result<Box<dyn PageFetcher>> {
                Ok(Box::new(fetcher.clone()))
            })
        }
    };
    Ok(factory)
}

fn open_store(path: &Path) -> anyhow::Result<ListingStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    ListingStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

async fn export_listings(path: &Path, listings: &[Listing]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(listings)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("💾 Exported {} listings to {}", listings.len(), path.display());
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "\n✅ {} listings ({} candidates, {} dropped, {} duplicates)",
        report.count, report.candidates, report.dropped, report.duplicates
    );
    for (source, count) in &report.per_source_count {
        println!("   {}: {}", source, count);
    }
    for fault in &report.faults {
        println!("   ⚠ {}: {}", fault.zone, fault.error);
    }
}

fn print_listings(listings: &[Listing]) {
    for (i, listing) in listings.iter().enumerate() {
        println!("{}. {} ({} €)", i + 1, listing.title, listing.price);
        println!(
            "   {} · {} m² · {} €/m² · {}",
            listing.housing_type, listing.surface, listing.price_per_area, listing.city
        );
        println!("   Source: {}", listing.source);
        println!("   URL: {}", listing.listing_url);
        println!();
    }
}
