//! One-time legacy snapshot import.
//!
//! Earlier builds of the agent persisted state as a flat JSON file. The
//! importer runs only when no durable store exists yet; a missing file is a
//! fresh start, any other failure propagates. Isolated here so it can be
//! dropped once no deployment still carries a snapshot.

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::types::{ActiveListing, Ledger, TokenStandard, MIN_LEDGER_VERSION};

// ---------------------------------------------------------------------------
// Snapshot shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySnapshot {
    #[serde(default)]
    version: Option<u32>,
    commission_pool_wei: String,
    sale_pool_wei: String,
    #[serde(default)]
    pending_burn_amount: Option<String>,
    #[serde(default)]
    pending_burn_cost_wei: Option<String>,
    last_tax_block: u64,
    #[serde(default)]
    listings: Vec<LegacyListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyListing {
    order_hash: String,
    collection: String,
    token_id: String,
    expected_proceeds_wei: String,
    listed_at_ms: i64,
    #[serde(default)]
    token_standard: Option<String>,
    #[serde(default)]
    listed_quantity: Option<String>,
    #[serde(default)]
    expected_post_sale_balance: Option<String>,
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Read and convert the snapshot at `path`. Returns `None` when the file
/// does not exist; every other failure propagates.
pub fn import(path: &str) -> Result<Option<Ledger>> {
    let json = match std::fs::read_to_string(Path::new(path)) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path, "No legacy snapshot present");
            return Ok(None);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read legacy snapshot {path}"))
        }
    };

    let snapshot: LegacySnapshot = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse legacy snapshot {path}"))?;

    let mut ledger = Ledger {
        version: snapshot.version.unwrap_or(MIN_LEDGER_VERSION).max(MIN_LEDGER_VERSION),
        commission_pool_wei: parse_dec(&snapshot.commission_pool_wei)?,
        sale_pool_wei: parse_dec(&snapshot.sale_pool_wei)?,
        pending_burn_amount: parse_opt(snapshot.pending_burn_amount.as_deref())?,
        pending_burn_cost_wei: parse_opt(snapshot.pending_burn_cost_wei.as_deref())?,
        last_tax_block: snapshot.last_tax_block,
        active_listings: Vec::new(),
    };

    for listing in snapshot.listings {
        let standard = match listing.token_standard.as_deref() {
            // Snapshots predate fungible-balance support.
            None => TokenStandard::Erc721,
            Some(tag) => tag.parse()?,
        };
        ledger.active_listings.push(ActiveListing {
            order_hash: listing
                .order_hash
                .parse::<B256>()
                .context("Invalid legacy order hash")?,
            collection: listing
                .collection
                .parse::<Address>()
                .context("Invalid legacy collection address")?,
            token_id: parse_dec(&listing.token_id)?,
            expected_proceeds_wei: parse_dec(&listing.expected_proceeds_wei)?,
            listed_at_ms: listing.listed_at_ms,
            token_standard: standard,
            listed_quantity: match listing.listed_quantity.as_deref() {
                None => U256::from(1),
                Some(quantity) => parse_dec(quantity)?,
            },
            expected_post_sale_balance: listing
                .expected_post_sale_balance
                .as_deref()
                .map(parse_dec)
                .transpose()?,
        });
    }

    Ok(Some(ledger))
}

fn parse_dec(s: &str) -> Result<U256> {
    U256::from_str_radix(s, 10).with_context(|| format!("Invalid decimal integer: {s:?}"))
}

fn parse_opt(s: Option<&str>) -> Result<U256> {
    s.map(parse_dec).transpose().map(|v| v.unwrap_or(U256::ZERO))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
