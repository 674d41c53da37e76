use crate::analyzer::price_analysis::StatTable;
use crate::model::{ConditionKey, Listing, StatGroup, StatKey, StorageError, VariantKey};
use crate::utils::parse_datetime;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};

pub struct SqliteStorage {
    conn: Connection,
}

/// Fixed-width timestamps so text comparison in SQL follows time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    parse_datetime(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

impl SqliteStorage {
    /// Opens the database at `db_path`, creating and migrating the schema.
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS listings (
                item_id TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                title TEXT NOT NULL,
                price_cents INTEGER NOT NULL,
                shipping_cents INTEGER NOT NULL DEFAULT 0,
                condition_code INTEGER NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (item_id, observed_at)
            );

            CREATE INDEX IF NOT EXISTS idx_listings_observed_at ON listings (observed_at);

            CREATE TABLE IF NOT EXISTS stat_groups (
                model_key TEXT NOT NULL,
                variant_key TEXT NOT NULL,
                condition_key TEXT NOT NULL,
                window_days INTEGER NOT NULL,
                n INTEGER NOT NULL,
                p10 INTEGER NOT NULL,
                p25 INTEGER NOT NULL,
                p50 INTEGER NOT NULL,
                p75 INTEGER NOT NULL,
                p90 INTEGER NOT NULL,
                dispersion_ratio REAL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (model_key, variant_key, condition_key, window_days)
            );
            ",
        )?;

        // Columns added after the first schema; older databases gain them on open.
        Self::migrate_add_column_if_missing(&conn, "listings", "raw_model_field", "TEXT")?;
        Self::migrate_add_column_if_missing(&conn, "listings", "brand", "TEXT")?;

        Ok(Self { conn })
    }

    fn migrate_add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        column_def: &str,
    ) -> Result<(), StorageError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing_columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        if !existing_columns.iter().any(|c| c == column) {
            let alter_sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def);
            conn.execute(&alter_sql, [])?;
        }

        Ok(())
    }

    /// Inserts one observation; re-saving the same item and timestamp replaces it.
    pub fn save_listing(&self, listing: &Listing) -> Result<(), StorageError> {
        Self::insert_listing(&self.conn, listing)
    }

    /// Saves a batch in one transaction and returns how many rows were written.
    pub fn save_listings(&mut self, listings: &[Listing]) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        for listing in listings {
            Self::insert_listing(&tx, listing)?;
        }
        tx.commit()?;
        Ok(listings.len())
    }

    fn insert_listing(conn: &Connection, listing: &Listing) -> Result<(), StorageError> {
        conn.execute(
            "INSERT OR REPLACE INTO listings (
                item_id, observed_at, title, price_cents, shipping_cents,
                condition_code, url, raw_model_field, brand
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &listing.item_id,
                timestamp(&listing.observed_at),
                &listing.title,
                listing.price_cents,
                listing.shipping_cents,
                listing.condition_code,
                &listing.url,
                &listing.raw_model_field,
                &listing.brand,
            ],
        )?;
        Ok(())
    }

    /// All observations at or after `cutoff`, oldest first.
    pub fn listings_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Listing>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, title, raw_model_field, brand, price_cents, shipping_cents,
                    condition_code, url, observed_at
             FROM listings WHERE observed_at >= ?1
             ORDER BY observed_at ASC, item_id ASC",
        )?;

        let rows = stmt.query_map(params![timestamp(&cutoff)], Self::map_listing)?;
        let mut listings = Vec::new();
        for listing in rows {
            listings.push(listing?);
        }
        Ok(listings)
    }

    /// Deletes observations older than `cutoff`; returns the number removed.
    pub fn prune_listings_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM listings WHERE observed_at < ?1",
            params![timestamp(&cutoff)],
        )?;
        Ok(removed)
    }

    fn map_listing(row: &Row) -> Result<Listing, rusqlite::Error> {
        let observed_at_str: String = row.get(8)?;
        Ok(Listing {
            item_id: row.get(0)?,
            title: row.get(1)?,
            raw_model_field: row.get(2)?,
            brand: row.get(3)?,
            price_cents: row.get(4)?,
            shipping_cents: row.get(5)?,
            condition_code: row.get(6)?,
            url: row.get(7)?,
            observed_at: parse_timestamp(&observed_at_str, 8)?,
        })
    }

    /// Swaps the stored groups of one window for `groups` atomically.
    pub fn replace_stats(
        &mut self,
        window_days: u32,
        groups: &[&StatGroup],
        computed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM stat_groups WHERE window_days = ?1",
            params![window_days],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO stat_groups (
                    model_key, variant_key, condition_key, window_days, n,
                    p10, p25, p50, p75, p90, dispersion_ratio, computed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            let computed_at = timestamp(&computed_at);
            for group in groups {
                // SQLite has no NaN; an undefined ratio is stored as NULL.
                let dispersion = group
                    .dispersion_ratio
                    .is_finite()
                    .then_some(group.dispersion_ratio);
                stmt.execute(params![
                    &group.key.model_key,
                    group.key.variant.as_str(),
                    group.key.condition.as_str(),
                    window_days,
                    group.n as i64,
                    group.p10,
                    group.p25,
                    group.p50,
                    group.p75,
                    group.p90,
                    dispersion,
                    &computed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Stored groups of one window as a lookup table.
    pub fn load_stats(&self, window_days: u32) -> Result<StatTable, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT model_key, variant_key, condition_key, n,
                    p10, p25, p50, p75, p90, dispersion_ratio
             FROM stat_groups WHERE window_days = ?1",
        )?;

        let rows = stmt.query_map(params![window_days], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                [
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                ],
                row.get::<_, Option<f64>>(9)?,
            ))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            let (model_key, variant, condition, n, [p10, p25, p50, p75, p90], dispersion) = row?;
            let variant: VariantKey = variant.parse().map_err(StorageError::InvalidValue)?;
            let condition: ConditionKey = condition.parse().map_err(StorageError::InvalidValue)?;
            let n = usize::try_from(n)
                .map_err(|_| StorageError::InvalidValue(format!("negative sample count: {}", n)))?;
            groups.push(StatGroup {
                key: StatKey {
                    model_key,
                    variant,
                    condition,
                    window_days,
                },
                n,
                p10,
                p25,
                p50,
                p75,
                p90,
                dispersion_ratio: dispersion.unwrap_or(f64::NAN),
            });
        }

        Ok(StatTable::from_groups(window_days, groups))
    }

    /// When the groups of a window were last replaced, if ever.
    pub fn stats_computed_at(&self, window_days: u32) -> Result<Option<DateTime<Utc>>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT MAX(computed_at) FROM stat_groups WHERE window_days = ?1")?;
        let raw: Option<String> = stmt.query_row(params![window_days], |row| row.get(0))?;
        raw.map(|value| {
            parse_datetime(&value)
                .ok_or_else(|| StorageError::InvalidValue(format!("invalid timestamp: {}", value)))
        })
        .transpose()
    }
}
