//! Listing reconciliation.
//!
//! Checks a bounded slice of active listings against chain state each tick
//! and captures proceeds for the ones that sold. Ambiguous information never
//! counts as a sale: a read failure retains the listing unchanged.

use alloy_primitives::{Address, U256};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::storage::LedgerStore;
use crate::types::{ActiveListing, Ledger, TokenStandard};

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub sold: usize,
    pub proceeds: U256,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct ListingReconciler {
    chain: Arc<dyn ChainClient>,
    treasury: Address,
    /// Listings checked per tick; the remainder carries over unchanged.
    max_per_tick: usize,
}

impl ListingReconciler {
    pub fn new(chain: Arc<dyn ChainClient>, treasury: Address, max_per_tick: usize) -> Self {
        Self {
            chain,
            treasury,
            max_per_tick: max_per_tick.max(1),
        }
    }

    /// Check the front of the listing queue, credit detected sales into the
    /// sale pool, and persist once if anything was captured.
    pub async fn reconcile(
        &self,
        ledger: &mut Ledger,
        store: &LedgerStore,
    ) -> Result<ReconcileSummary> {
        if ledger.active_listings.is_empty() {
            return Ok(ReconcileSummary {
                checked: 0,
                sold: 0,
                proceeds: U256::ZERO,
            });
        }

        let check_count = self.max_per_tick.min(ledger.active_listings.len());
        let mut retained = Vec::with_capacity(ledger.active_listings.len());
        let mut proceeds = U256::ZERO;
        let mut sold = 0usize;

        let listings = std::mem::take(&mut ledger.active_listings);
        for (index, listing) in listings.into_iter().enumerate() {
            if index >= check_count {
                retained.push(listing);
                continue;
            }
            match self.is_sold(&listing).await {
                Ok(true) => {
                    info!(
                        order_hash = %listing.order_hash,
                        collection = %listing.collection,
                        token_id = %listing.token_id,
                        proceeds = %listing.expected_proceeds_wei,
                        "Listing sold"
                    );
                    proceeds += listing.expected_proceeds_wei;
                    sold += 1;
                }
                Ok(false) => {
                    debug!(order_hash = %listing.order_hash, "Listing still open");
                    retained.push(listing);
                }
                Err(err) => {
                    // Never assume a sale on ambiguous information.
                    warn!(
                        order_hash = %listing.order_hash,
                        collection = %listing.collection,
                        error = %err,
                        "Listing check failed, retaining for next tick"
                    );
                    retained.push(listing);
                }
            }
        }
        ledger.active_listings = retained;

        if sold > 0 {
            ledger.credit_sale(proceeds);
            store.save(ledger).await?;
            info!(sold, proceeds = %proceeds, sale_pool = %ledger.sale_pool_wei, "Sale proceeds captured");
        }
        Ok(ReconcileSummary {
            checked: check_count,
            sold,
            proceeds,
        })
    }

    async fn is_sold(&self, listing: &ActiveListing) -> Result<bool> {
        match listing.token_standard {
            TokenStandard::Erc721 => {
                let owner = self
                    .chain
                    .owner_of(listing.collection, listing.token_id)
                    .await?;
                Ok(owner != self.treasury)
            }
            TokenStandard::Erc1155 => {
                let balance = self
                    .chain
                    .erc1155_balance(listing.collection, self.treasury, listing.token_id)
                    .await?;
                let threshold = listing.expected_post_sale_balance.unwrap_or_default();
                Ok(balance <= threshold)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
