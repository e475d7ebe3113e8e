//! Buyback and burn.
//!
//! Converts a bounded chunk of the sale pool into the monitored token and
//! burns it. Two resumable phases with a persisted boundary between them:
//! a restart that finds a pending burn goes straight to phase 2 and never
//! re-swaps, so a given swap's cost is debited at most once.

use alloy_primitives::{address, Address, U256};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::submitter::TransactionSubmitter;
use crate::chain::{abi, ChainClient, TxIntent};
use crate::storage::LedgerStore;
use crate::types::Ledger;

/// Where burned tokens go.
pub const BURN_ADDRESS: Address = address!("000000000000000000000000000000000000dEaD");

/// Balance re-reads after a confirmed swap, tolerating indexing lag.
const BALANCE_POLL_ATTEMPTS: u32 = 3;
const BALANCE_POLL_DELAY_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuybackOutcome {
    /// No pending burn and an empty sale pool.
    Idle,
    /// Swap confirmed but no balance increase was ever observed; the chunk
    /// was written off and no burn is pending.
    SwapDiscarded { chunk: U256 },
    /// Swap and burn both completed this invocation (or a resumed burn
    /// completed).
    Burned { amount: U256, cost: U256 },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct BuybackBurnEngine {
    chain: Arc<dyn ChainClient>,
    token: Address,
    treasury: Address,
    /// Max native value converted per invocation; `None` takes the full pool.
    chunk_wei: Option<U256>,
}

impl BuybackBurnEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        token: Address,
        treasury: Address,
        chunk_wei: Option<U256>,
    ) -> Self {
        Self {
            chain,
            token,
            treasury,
            chunk_wei,
        }
    }

    /// Whether this tick should go to the buyback instead of a purchase.
    pub fn has_work(&self, ledger: &Ledger) -> bool {
        ledger.has_pending_burn() || !ledger.sale_pool_wei.is_zero()
    }

    /// Run the state machine: phase 1 (swap) only when nothing is pending,
    /// then phase 2 (burn) whenever a pending burn exists.
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        store: &LedgerStore,
        submitter: &mut TransactionSubmitter,
    ) -> Result<BuybackOutcome> {
        if !ledger.has_pending_burn() {
            if ledger.sale_pool_wei.is_zero() {
                return Ok(BuybackOutcome::Idle);
            }
            if let Some(outcome) = self.swap(ledger, store, submitter).await? {
                return Ok(outcome);
            }
        } else {
            info!(
                pending = %ledger.pending_burn_amount,
                cost = %ledger.pending_burn_cost_wei,
                "Resuming at burn phase"
            );
        }
        self.burn(ledger, store, submitter).await
    }

    /// Phase 1: convert a chunk of the sale pool into tokens. Returns
    /// `Some` when the invocation ends here (write-off), `None` when a
    /// pending burn was recorded and phase 2 should follow.
    async fn swap(
        &self,
        ledger: &mut Ledger,
        store: &LedgerStore,
        submitter: &mut TransactionSubmitter,
    ) -> Result<Option<BuybackOutcome>> {
        let chunk = match self.chunk_wei {
            Some(max) => max.min(ledger.sale_pool_wei),
            None => ledger.sale_pool_wei,
        };

        let authorized = self
            .chain
            .buyback_authorized(self.token, self.treasury)
            .await
            .context("Failed to read buyback authorization")?;
        anyhow::ensure!(
            authorized,
            "treasury {} is not authorized to route buybacks through {}",
            self.treasury,
            self.token
        );

        let balance_before = self
            .chain
            .erc20_balance(self.token, self.treasury)
            .await
            .context("Failed to snapshot token balance")?;

        info!(chunk = %chunk, sale_pool = %ledger.sale_pool_wei, "Swapping sale proceeds");
        submitter
            .submit_and_wait(&TxIntent {
                to: self.token,
                value: chunk,
                data: abi::buyback(),
                label: "swap",
            })
            .await?;

        let mut bought = U256::ZERO;
        for attempt in 1..=BALANCE_POLL_ATTEMPTS {
            let balance_after = self
                .chain
                .erc20_balance(self.token, self.treasury)
                .await
                .context("Failed to re-read token balance")?;
            bought = balance_after.saturating_sub(balance_before);
            if !bought.is_zero() {
                break;
            }
            debug!(attempt, "No balance increase yet");
            if attempt < BALANCE_POLL_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(BALANCE_POLL_DELAY_MS)).await;
            }
        }

        if bought.is_zero() {
            // Lossy no-op, deliberately not retried: the chunk is written
            // off so the same value can never fund two swaps.
            warn!(chunk = %chunk, "Swap confirmed but no balance increase observed, writing chunk off");
            ledger.sale_pool_wei -= chunk;
            store.save(ledger).await?;
            return Ok(Some(BuybackOutcome::SwapDiscarded { chunk }));
        }

        ledger.record_pending_burn(bought, chunk);
        // Crash-recovery boundary: a restart resumes at the burn.
        store.save(ledger).await?;
        info!(bought = %bought, cost = %chunk, "Swap complete, burn pending");
        Ok(None)
    }

    /// Phase 2: send the pending amount to the burn address and settle.
    async fn burn(
        &self,
        ledger: &mut Ledger,
        store: &LedgerStore,
        submitter: &mut TransactionSubmitter,
    ) -> Result<BuybackOutcome> {
        let amount = ledger.pending_burn_amount;
        let cost = ledger.pending_burn_cost_wei;

        submitter
            .submit_and_wait(&TxIntent {
                to: self.token,
                value: U256::ZERO,
                data: abi::erc20_transfer(BURN_ADDRESS, amount),
                label: "burn",
            })
            .await?;

        ledger.settle_burn();
        store.save(ledger).await?;
        info!(
            amount = %amount,
            cost = %cost,
            sale_pool = %ledger.sale_pool_wei,
            "Burn confirmed"
        );
        Ok(BuybackOutcome::Burned { amount, cost })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
