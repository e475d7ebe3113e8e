//! Tax collection.
//!
//! Scans the monitored token's "proceeds sent" events addressed to the
//! treasury and credits their sum into the commission pool. The scan range
//! is split into bounded sub-ranges to respect provider limits, and the
//! watermark advances to the chain head even when nothing matched, so a
//! long-idle deployment never rescans an unbounded backlog.

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::chain::ChainClient;
use crate::storage::LedgerStore;
use crate::types::Ledger;

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// What one collection pass found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxSummary {
    pub events: usize,
    pub collected: U256,
    pub scanned_to: u64,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

pub struct TaxCollector {
    chain: Arc<dyn ChainClient>,
    token: Address,
    treasury: Address,
    /// Max blocks per log request.
    max_span: u64,
    /// Pause between sub-range requests.
    throttle: Duration,
}

impl TaxCollector {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        token: Address,
        treasury: Address,
        max_span: u64,
        throttle: Duration,
    ) -> Self {
        Self {
            chain,
            token,
            treasury,
            max_span: max_span.max(1),
            throttle,
        }
    }

    /// Scan `(last_tax_block, head]`, credit matched amounts, advance the
    /// watermark, and persist. A read failure aborts before any mutation.
    pub async fn collect(&self, ledger: &mut Ledger, store: &LedgerStore) -> Result<TaxSummary> {
        let head = self
            .chain
            .head_block()
            .await
            .context("Failed to read chain head")?;
        if head <= ledger.last_tax_block {
            debug!(head, watermark = ledger.last_tax_block, "No new blocks to scan");
            return Ok(TaxSummary {
                events: 0,
                collected: U256::ZERO,
                scanned_to: ledger.last_tax_block,
            });
        }

        let mut collected = U256::ZERO;
        let mut events = 0usize;
        let mut from = ledger.last_tax_block + 1;
        while from <= head {
            let to = head.min(from + self.max_span - 1);
            let batch = self
                .chain
                .proceeds_events(self.token, self.treasury, from, to)
                .await
                .with_context(|| format!("Tax scan failed over blocks {from}..={to}"))?;
            for event in &batch {
                collected += event.amount;
            }
            events += batch.len();
            from = to + 1;
            if from <= head && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
        }

        ledger.credit_commission(collected);
        ledger.advance_tax_block(head);
        store.save(ledger).await?;

        info!(
            events,
            collected = %collected,
            scanned_to = head,
            commission_pool = %ledger.commission_pool_wei,
            "Tax collection complete"
        );
        Ok(TaxSummary {
            events,
            collected,
            scanned_to: head,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
