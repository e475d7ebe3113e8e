//! Persistence layer.
//!
//! SQLite-backed durable store for the ledger: one scalar row plus a
//! listings table, written in a single transaction so a crash mid-save can
//! never expose a partially-updated snapshot. Schema evolves by additive
//! columns with defaults only.

pub mod legacy;

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

use crate::types::{
    ActiveListing, FlywheelError, Ledger, TokenStandard, MIN_LEDGER_VERSION,
};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// v1 scalar table. Big integers cross the SQL boundary as decimal strings.
const CREATE_LEDGER: &str = "\
CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    version INTEGER NOT NULL,
    commission_pool_wei TEXT NOT NULL,
    sale_pool_wei TEXT NOT NULL,
    pending_burn_amount TEXT NOT NULL,
    pending_burn_cost_wei TEXT NOT NULL,
    last_tax_block TEXT NOT NULL
)";

/// v1 listings table. The v2 columns are added by `ensure_schema`.
const CREATE_LISTINGS: &str = "\
CREATE TABLE IF NOT EXISTS listings (
    order_hash TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    token_id TEXT NOT NULL,
    expected_proceeds_wei TEXT NOT NULL,
    listed_at_ms INTEGER NOT NULL,
    token_standard TEXT NOT NULL
)";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (or create) the store and bring the schema up to date.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(Path::new(path))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open ledger store at {path}"))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_LEDGER)
            .execute(&self.pool)
            .await
            .context("Failed to create ledger table")?;
        sqlx::query(CREATE_LISTINGS)
            .execute(&self.pool)
            .await
            .context("Failed to create listings table")?;

        // v2 additions — additive with defaults, never destructive, so older
        // and newer builds can open the same file across restarts.
        self.ensure_column("listings", "listed_quantity", "TEXT NOT NULL DEFAULT '1'")
            .await?;
        self.ensure_column("listings", "expected_post_sale_balance", "TEXT")
            .await?;
        Ok(())
    }

    async fn ensure_column(&self, table: &str, column: &str, decl: &str) -> Result<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to inspect {table} schema"))?;
        let exists = rows
            .iter()
            .any(|row| row.get::<String, _>("name") == column);
        if !exists {
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to add {table}.{column}"))?;
            info!(table, column, "Schema migrated: column added");
        }
        Ok(())
    }

    /// Read the last committed snapshot, or `None` when no ledger row has
    /// ever been persisted. The version is floor-clamped to the minimum
    /// supported version.
    pub async fn load(&self) -> Result<Option<Ledger>> {
        let row = sqlx::query(
            "SELECT version, commission_pool_wei, sale_pool_wei, pending_burn_amount, \
             pending_burn_cost_wei, last_tax_block FROM ledger WHERE id = 0",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read ledger row")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let version: i64 = row.try_get("version")?;
        let mut ledger = Ledger {
            version: (version.max(0) as u32).max(MIN_LEDGER_VERSION),
            commission_pool_wei: parse_wei(&row.try_get::<String, _>("commission_pool_wei")?)?,
            sale_pool_wei: parse_wei(&row.try_get::<String, _>("sale_pool_wei")?)?,
            pending_burn_amount: parse_wei(&row.try_get::<String, _>("pending_burn_amount")?)?,
            pending_burn_cost_wei: parse_wei(&row.try_get::<String, _>("pending_burn_cost_wei")?)?,
            last_tax_block: row
                .try_get::<String, _>("last_tax_block")?
                .parse::<u64>()
                .context("Invalid last_tax_block")?,
            active_listings: Vec::new(),
        };

        // rowid order is insertion order, which is listing order.
        let listing_rows = sqlx::query(
            "SELECT order_hash, collection, token_id, expected_proceeds_wei, listed_at_ms, \
             token_standard, listed_quantity, expected_post_sale_balance \
             FROM listings ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read listings")?;

        for row in listing_rows {
            let standard: TokenStandard = row.try_get::<String, _>("token_standard")?.parse()?;
            let post_sale: Option<String> = row.try_get("expected_post_sale_balance")?;
            ledger.active_listings.push(ActiveListing {
                order_hash: row
                    .try_get::<String, _>("order_hash")?
                    .parse::<B256>()
                    .context("Invalid order hash")?,
                collection: row
                    .try_get::<String, _>("collection")?
                    .parse::<Address>()
                    .context("Invalid collection address")?,
                token_id: parse_wei(&row.try_get::<String, _>("token_id")?)?,
                expected_proceeds_wei: parse_wei(
                    &row.try_get::<String, _>("expected_proceeds_wei")?,
                )?,
                listed_at_ms: row.try_get("listed_at_ms")?,
                token_standard: standard,
                listed_quantity: parse_wei(&row.try_get::<String, _>("listed_quantity")?)?,
                expected_post_sale_balance: post_sale.as_deref().map(parse_wei).transpose()?,
            });
        }

        Ok(Some(ledger))
    }

    /// Persist the full ledger in one transaction: upsert the scalar row,
    /// then replace the entire listing set. All-or-nothing — the previous
    /// snapshot stays authoritative until the commit.
    ///
    /// Errors are classified fatal: continuing after a failed commit would
    /// mean running on state the disk does not have.
    pub async fn save(&self, ledger: &Ledger) -> Result<()> {
        self.save_txn(ledger)
            .await
            .map_err(|err| anyhow::Error::new(FlywheelError::Storage(format!("{err:#}"))))
    }

    async fn save_txn(&self, ledger: &Ledger) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin save")?;

        sqlx::query(
            "INSERT INTO ledger (id, version, commission_pool_wei, sale_pool_wei, \
             pending_burn_amount, pending_burn_cost_wei, last_tax_block) \
             VALUES (0, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             version = excluded.version, \
             commission_pool_wei = excluded.commission_pool_wei, \
             sale_pool_wei = excluded.sale_pool_wei, \
             pending_burn_amount = excluded.pending_burn_amount, \
             pending_burn_cost_wei = excluded.pending_burn_cost_wei, \
             last_tax_block = excluded.last_tax_block",
        )
        .bind(ledger.version as i64)
        .bind(ledger.commission_pool_wei.to_string())
        .bind(ledger.sale_pool_wei.to_string())
        .bind(ledger.pending_burn_amount.to_string())
        .bind(ledger.pending_burn_cost_wei.to_string())
        .bind(ledger.last_tax_block.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to upsert ledger row")?;

        sqlx::query("DELETE FROM listings")
            .execute(&mut *tx)
            .await
            .context("Failed to clear listings")?;

        for listing in &ledger.active_listings {
            sqlx::query(
                "INSERT INTO listings (order_hash, collection, token_id, \
                 expected_proceeds_wei, listed_at_ms, token_standard, listed_quantity, \
                 expected_post_sale_balance) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(listing.order_hash.to_string())
            .bind(listing.collection.to_string())
            .bind(listing.token_id.to_string())
            .bind(listing.expected_proceeds_wei.to_string())
            .bind(listing.listed_at_ms)
            .bind(listing.token_standard.as_str())
            .bind(listing.listed_quantity.to_string())
            .bind(
                listing
                    .expected_post_sale_balance
                    .map(|balance| balance.to_string()),
            )
            .execute(&mut *tx)
            .await
            .context("Failed to insert listing row")?;
        }

        tx.commit().await.context("Failed to commit save")?;
        debug!(ledger = %ledger, "Ledger saved");
        Ok(())
    }
}

/// Parse a non-negative decimal integer into a U256.
fn parse_wei(s: &str) -> Result<U256> {
    U256::from_str_radix(s, 10).with_context(|| format!("Invalid decimal integer: {s:?}"))
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

/// Construct the process ledger: prefer the durable store; on first run try
/// exactly one legacy-snapshot migration; otherwise start fresh with the
/// scan watermark at `initial_block`. Every path persists immediately so
/// the next load always sees a durable store.
pub async fn restore(
    store: &LedgerStore,
    legacy_path: &str,
    initial_block: u64,
) -> Result<Ledger> {
    let ledger = match store.load().await? {
        Some(ledger) => {
            info!(%ledger, "Ledger loaded from durable store");
            ledger
        }
        None => match legacy::import(legacy_path)? {
            Some(ledger) => {
                info!(%ledger, path = legacy_path, "Migrated legacy snapshot");
                ledger
            }
            None => {
                info!(initial_block, "No prior state found, starting fresh");
                Ledger::new(initial_block)
            }
        },
    };
    store.save(&ledger).await?;
    Ok(ledger)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
