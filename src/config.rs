use crate::models::{Source, Zone};
use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How pages are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Browser,
    Http,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub concurrency: usize,
    pub zone_timeout: Duration,
    pub fetcher: FetcherKind,
    pub headless: bool,
    pub debug_dir: Option<PathBuf>,
    pub zones: Vec<Zone>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let zones = match env::var("ZONES_FILE") {
            Ok(path) => load_zones(Path::new(&path))?,
            Err(_) => default_zones(),
        };

        Ok(Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/logements.db".to_string())
                .into(),
            concurrency: env::var("SCRAPE_CONCURRENCY")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<usize>()
                .context("SCRAPE_CONCURRENCY must be a valid number")?
                .max(1),
            zone_timeout: Duration::from_secs(
                env::var("ZONE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()
                    .context("ZONE_TIMEOUT_SECS must be a valid number")?,
            ),
            fetcher: parse_fetcher(&env::var("FETCHER").unwrap_or_else(|_| "browser".to_string()))?,
            headless: parse_bool(&env::var("HEADLESS").unwrap_or_else(|_| "true".to_string()))
                .context("HEADLESS must be true or false")?,
            debug_dir: env::var("DEBUG_DIR").ok().map(PathBuf::from),
            zones,
        })
    }

    /// Zones of the given source only, all zones when `None`
    pub fn zones_for(&self, source: Option<Source>) -> Vec<Zone> {
        self.zones
            .iter()
            .filter(|zone| source.map_or(true, |s| zone.source == s))
            .cloned()
            .collect()
    }
}

fn parse_fetcher(value: &str) -> Result<FetcherKind> {
    match value.trim().to_lowercase().as_str() {
        "browser" => Ok(FetcherKind::Browser),
        "http" => Ok(FetcherKind::Http),
        other => bail!("FETCHER must be 'browser' or 'http', got '{}'", other),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => bail!("not a boolean: '{}'", other),
    }
}

/// Reads a JSON array of `{url, city, source}` objects
pub fn load_zones(path: &Path) -> Result<Vec<Zone>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read zones file {}", path.display()))?;
    parse_zones(&content).with_context(|| format!("Invalid zones file {}", path.display()))
}

fn parse_zones(content: &str) -> Result<Vec<Zone>> {
    let zones: Vec<Zone> = serde_json::from_str(content)?;
    if zones.is_empty() {
        bail!("no zones defined");
    }
    Ok(zones)
}

/// Cities covered out of the box
pub fn default_zones() -> Vec<Zone> {
    let immojeune = [
        ("https://www.immojeune.com/logement-etudiant/paris-75.html", "Paris"),
        ("https://www.immojeune.com/logement-etudiant/marseille-13.html", "Marseille"),
        ("https://www.immojeune.com/logement-etudiant/lyon-69.html", "Lyon"),
        ("https://www.immojeune.com/logement-etudiant/bordeaux-33.html", "Bordeaux"),
    ];
    let studapart = [
        ("https://www.studapart.com/fr/logement-etudiant-paris", "Paris"),
        ("https://www.studapart.com/fr/logement-etudiant-bordeaux", "Bordeaux"),
        ("https://www.studapart.com/fr/logement-etudiant-lille", "Lille"),
        ("https://www.studapart.com/fr/logement-etudiant-lyon", "Lyon"),
        ("https://www.studapart.com/fr/logement-etudiant-toulouse", "Toulouse"),
        ("https://www.studapart.com/fr/logement-etudiant-marseille", "Marseille"),
    ];

    immojeune
        .into_iter()
        .map(|(url, city)| Zone::new(url, city, Source::ImmoJeune))
        .chain(
            studapart
                .into_iter()
                .map(|(url, city)| Zone::new(url, city, Source::Studapart)),
        )
        .collect()
}
