//! Nonce-cached, fee-escalating transaction submission.
//!
//! One submitter instance owns the process's nonce cache. It is only ever
//! driven serially by the tick loop, which guarantees strictly increasing
//! nonces without on-chain races.

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ChainClient, FeeQuote, TxIntent, TxOutcome, TxReceipt, TxSubmission};
use crate::types::FlywheelError;

/// Fee escalation table, applied in order to the base quote.
pub const FEE_ESCALATION_PCT: [u64; 3] = [100, 120, 140];

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectionClass {
    /// Priced below the pool's floor or an existing replacement candidate.
    Underpriced,
    /// The cached nonce no longer matches pending state.
    StaleNonce,
    /// Anything else — not retryable here.
    Other,
}

/// Classify a provider rejection by its message text. Providers do not agree
/// on error codes, so substring matching on the message is the portable test.
fn classify(message: &str) -> RejectionClass {
    let msg = message.to_lowercase();
    if msg.contains("nonce too low") || msg.contains("invalid nonce") || msg.contains("stale") {
        RejectionClass::StaleNonce
    } else if msg.contains("underpriced")
        || msg.contains("replacement transaction")
        || msg.contains("fee too low")
    {
        RejectionClass::Underpriced
    } else {
        RejectionClass::Other
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    sender: Address,
    /// Next nonce to use. `None` until first use or after a staleness signal.
    cached_nonce: Option<u64>,
}

impl TransactionSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, sender: Address) -> Self {
        Self {
            chain,
            sender,
            cached_nonce: None,
        }
    }

    /// The cached next nonce, if any. Exposed for inspection in tests.
    pub fn cached_nonce(&self) -> Option<u64> {
        self.cached_nonce
    }

    /// Drop the cache; the next acquisition re-reads pending state.
    pub fn reset_nonce(&mut self) {
        self.cached_nonce = None;
    }

    async fn next_nonce(&mut self) -> Result<u64> {
        match self.cached_nonce {
            Some(nonce) => Ok(nonce),
            None => {
                let nonce = self
                    .chain
                    .pending_nonce(self.sender)
                    .await
                    .context("Failed to fetch pending nonce")?;
                debug!(nonce, "Nonce cache refreshed from chain");
                self.cached_nonce = Some(nonce);
                Ok(nonce)
            }
        }
    }

    async fn base_fees(&self) -> Result<FeeQuote> {
        match self.chain.estimate_fees().await {
            Ok(quote) => Ok(quote),
            Err(err) => {
                debug!(error = %err, "EIP-1559 estimation unavailable, using flat gas price");
                let gas_price = self
                    .chain
                    .gas_price()
                    .await
                    .context("Failed to fetch gas price")?;
                Ok(FeeQuote::Legacy { gas_price })
            }
        }
    }

    /// Broadcast `intent`, escalating fees through the table on transient
    /// rejections. Returns the transaction hash on acceptance.
    pub async fn submit(&mut self, intent: &TxIntent) -> Result<B256> {
        let nonce = self.next_nonce().await?;
        let base = self.base_fees().await?;
        let last_step = FEE_ESCALATION_PCT.len() - 1;

        for (step, pct) in FEE_ESCALATION_PCT.iter().enumerate() {
            let submission = TxSubmission {
                intent: intent.clone(),
                nonce,
                fees: base.scale(*pct),
            };
            match self.chain.submit(&submission).await {
                Ok(tx_hash) => {
                    // Successful broadcast: the next transaction follows at
                    // nonce + 1 without re-reading chain state.
                    self.cached_nonce = Some(nonce + 1);
                    info!(
                        label = intent.label,
                        tx_hash = %tx_hash,
                        nonce,
                        fee_pct = pct,
                        "Transaction submitted"
                    );
                    return Ok(tx_hash);
                }
                Err(err) => {
                    let class = classify(&format!("{err:#}"));
                    if step == last_step || class == RejectionClass::Other {
                        return Err(err.context(format!(
                            "Submission rejected ({}, nonce {nonce}, step {step})",
                            intent.label
                        )));
                    }
                    if class == RejectionClass::StaleNonce {
                        self.reset_nonce();
                    }
                    warn!(
                        label = intent.label,
                        nonce,
                        fee_pct = pct,
                        class = ?class,
                        error = %err,
                        "Submission rejected, escalating fee"
                    );
                }
            }
        }
        unreachable!("escalation table is never empty")
    }

    /// Wait for a terminal outcome and map it to the domain error taxonomy.
    pub async fn wait(&mut self, tx_hash: B256) -> Result<TxReceipt> {
        match self
            .chain
            .confirm(tx_hash)
            .await
            .context("Confirmation wait failed")?
        {
            TxOutcome::Confirmed(receipt) => {
                debug!(tx_hash = %tx_hash, block = receipt.block_number, "Transaction confirmed");
                Ok(receipt)
            }
            TxOutcome::Reverted { tx_hash } => Err(FlywheelError::Reverted { tx_hash }.into()),
            TxOutcome::NotFound { tx_hash } => {
                // The transaction vanished from the pool; our local nonce
                // accounting can no longer be trusted.
                self.reset_nonce();
                Err(FlywheelError::ReceiptMissing { tx_hash }.into())
            }
        }
    }

    /// The single submit-then-confirm path every transaction-writing service
    /// goes through.
    pub async fn submit_and_wait(&mut self, intent: &TxIntent) -> Result<TxReceipt> {
        let tx_hash = self.submit(intent).await?;
        self.wait(tx_hash).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
