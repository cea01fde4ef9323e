//! SQLite snapshot of the latest scrape.
//!
//! The `logements` table only ever holds one run's listings: each run
//! replaces the whole content in a single transaction.

use crate::error::Result;
use crate::heuristics::normalize_housing_type;
use crate::models::{HousingType, Listing, Source};
use crate::normalize::{MIN_PRICE, MIN_PRICE_PER_AREA, MIN_SURFACE};
use chrono::NaiveDateTime;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const SCRAPED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COLUMNS: &str =
    "id, titre, prix, surface, prix_m2, type_bien, ville, site_source, image, url, date_scraping";

/// Ordering of query results, cheapest first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    Price,
    #[default]
    PricePerArea,
}

/// Filters for `ListingStore::find`. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    /// Case-insensitive substring of the city label
    pub city: Option<String>,
    pub min_surface: Option<f64>,
    /// Free text, normalized like a badge ("studio" → STUDIO)
    pub housing_type: Option<String>,
    pub max_price: Option<i64>,
    pub sort: SortKey,
}

pub struct ListingStore {
    conn: Mutex<Connection>,
}

impl ListingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction already rolled back; the connection is still usable
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swaps the stored dataset for `listings`.
    ///
    /// Delete and inserts share one IMMEDIATE transaction: a failure on any
    /// row rolls everything back and the previous dataset stays visible.
    pub fn replace_all(&self, listings: &[Listing]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = tx.execute("DELETE FROM logements", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO logements (titre, prix, surface, prix_m2, type_bien, ville, site_source, image, url, date_scraping)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for listing in listings {
                stmt.execute(params![
                    listing.title,
                    listing.price,
                    listing.surface,
                    listing.price_per_area,
                    listing.housing_type.as_str(),
                    listing.city,
                    listing.source.as_str(),
                    listing.image_url,
                    listing.listing_url,
                    listing.scraped_at.format(SCRAPED_AT_FORMAT).to_string(),
                ])?;
            }
        }
        tx.commit()?;

        info!("Replaced {} stored listings with {}", removed, listings.len());
        Ok(listings.len())
    }

    /// Listings matching `query`, cheapest first by `query.sort`.
    ///
    /// The normalization thresholds are applied again here so that rows
    /// written by an older, laxer scraper never surface.
    pub fn find(&self, query: &ListingQuery) -> Result<Vec<Listing>> {
        let mut sql = format!(
            "SELECT {} FROM logements WHERE prix > ? AND surface > ? AND prix_m2 > ?",
            COLUMNS
        );
        let mut values: Vec<Value> = vec![
            Value::Integer(MIN_PRICE),
            Value::Real(MIN_SURFACE),
            Value::Real(MIN_PRICE_PER_AREA),
        ];

        if let Some(min_surface) = query.min_surface {
            sql.push_str(" AND surface >= ?");
            values.push(Value::Real(min_surface));
        }
        if let Some(ty) = query.housing_type.as_deref().and_then(normalize_housing_type) {
            sql.push_str(" AND type_bien = ?");
            values.push(Value::Text(ty.as_str().to_string()));
        }
        if let Some(max_price) = query.max_price {
            sql.push_str(" AND prix <= ?");
            values.push(Value::Integer(max_price));
        }

        sql.push_str(match query.sort {
            SortKey::Price => " ORDER BY prix ASC, id ASC",
            SortKey::PricePerArea => " ORDER BY prix_m2 ASC, id ASC",
        });

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_from_iter(values), row_to_listing)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // SQLite LIKE only folds ASCII, city labels are French ("Évry")
        if let Some(city) = query.city.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            let needle = city.to_lowercase();
            rows.retain(|listing| listing.city.to_lowercase().contains(&needle));
        }
        Ok(rows)
    }

    /// Number of stored rows, thresholds not applied
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM logements", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Distinct city labels present in the dataset
    pub fn cities(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT ville FROM logements ORDER BY ville")?;
        let cities = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(cities)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS logements (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            titre         TEXT NOT NULL,
            prix          INTEGER NOT NULL CHECK (prix > 0),
            surface       REAL NOT NULL CHECK (surface > 0),
            prix_m2       REAL NOT NULL,
            type_bien     TEXT NOT NULL,
            ville         TEXT NOT NULL,
            site_source   TEXT NOT NULL,
            image         TEXT,
            url           TEXT NOT NULL,
            date_scraping TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_logements_ville ON logements(ville);
        CREATE INDEX IF NOT EXISTS idx_logements_prix_m2 ON logements(prix_m2);
        ",
    )?;
    Ok(())
}

fn row_to_listing(row: &Row<'_>) -> rusqlite::Result<Listing> {
    let source: String = row.get(7)?;
    let source = source
        .parse::<Source>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?;

    let scraped_at: String = row.get(10)?;
    let scraped_at = NaiveDateTime::parse_from_str(&scraped_at, SCRAPED_AT_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?
        .and_utc();

    let housing_type: String = row.get(5)?;

    Ok(Listing {
        id: Some(row.get(0)?),
        title: row.get(1)?,
        price: row.get(2)?,
        surface: row.get(3)?,
        price_per_area: row.get(4)?,
        housing_type: HousingType::from_code(&housing_type),
        city: row.get(6)?,
        source,
        image_url: row.get(8)?,
        listing_url: row.get(9)?,
        scraped_at,
    })
}
