//! Purchase orchestration.
//!
//! Spends the commission pool on the configured acquisition target, then
//! relists the acquired asset at a markup: waits out transfer propagation,
//! ensures the transfer conduit is approved, signs the rescaled order, and
//! validates it on-chain before recording the listing. The pool deduction
//! is persisted before any relist work so a crash after a confirmed
//! purchase can never lose it.

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{abi, ChainClient, TxIntent};
use crate::chain::submitter::TransactionSubmitter;
use crate::exchange::hash::OrderHasher;
use crate::exchange::{
    encode_validate_call, markup_total, rescale_amounts, ConsiderationItem, ItemType, OfferItem,
    OrderComponents,
};
use crate::marketplace::{AcquisitionTarget, Marketplace, OrderBlueprint};
use crate::storage::LedgerStore;
use crate::types::{ActiveListing, Ledger, TokenStandard};

/// How often the asset is re-checked for transfer propagation lag.
const OWNERSHIP_POLL_ATTEMPTS: u32 = 5;
const OWNERSHIP_POLL_DELAY_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Configuration and outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PurchaseConfig {
    pub target: AcquisitionTarget,
    /// The exchange verifier contract (order validation entry point).
    pub exchange: Address,
    /// Transfer conduit operator that must be approved on the collection.
    pub conduit: Address,
    /// Relist total = ceil(cost * markup_bps / 10000).
    pub markup_bps: u64,
    pub relist_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Gated off: no funds, no listing available, or price above the pool.
    Idle,
    /// Bought, but the payload carried no blueprint to relist from.
    PurchasedOnly { cost: U256 },
    /// Bought and relisted.
    Listed {
        order_hash: B256,
        expected_proceeds: U256,
    },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct PurchaseOrchestrator {
    chain: Arc<dyn ChainClient>,
    marketplace: Arc<dyn Marketplace>,
    hasher: OrderHasher,
    signer: PrivateKeySigner,
    treasury: Address,
    config: PurchaseConfig,
}

impl PurchaseOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        marketplace: Arc<dyn Marketplace>,
        hasher: OrderHasher,
        signer: PrivateKeySigner,
        treasury: Address,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            chain,
            marketplace,
            hasher,
            signer,
            treasury,
            config,
        }
    }

    /// Attempt one purchase-and-relist round.
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        store: &LedgerStore,
        submitter: &mut TransactionSubmitter,
    ) -> Result<PurchaseOutcome> {
        if ledger.commission_pool_wei.is_zero() {
            return Ok(PurchaseOutcome::Idle);
        }

        let Some(payload) = self
            .marketplace
            .best_execution(&self.config.target, self.treasury)
            .await?
        else {
            debug!(target = %self.config.target, "Nothing listed for target");
            return Ok(PurchaseOutcome::Idle);
        };

        if payload.price > ledger.commission_pool_wei {
            info!(
                target = %self.config.target,
                price = %payload.price,
                commission_pool = %ledger.commission_pool_wei,
                "Best listing exceeds commission pool, waiting for more tax"
            );
            return Ok(PurchaseOutcome::Idle);
        }

        info!(target = %self.config.target, price = %payload.price, "Executing purchase");
        let receipt = submitter
            .submit_and_wait(&TxIntent {
                to: payload.router,
                value: payload.value,
                data: payload.calldata.clone(),
                label: "purchase",
            })
            .await?;

        ledger.debit_commission(payload.price)?;
        // Crash boundary: the deduction outlives anything that fails below.
        store.save(ledger).await?;
        info!(
            tx_hash = %receipt.tx_hash,
            cost = %payload.price,
            commission_pool = %ledger.commission_pool_wei,
            "Purchase confirmed"
        );

        let Some(blueprint) = payload.blueprint else {
            warn!(target = %self.config.target, "Payload carried no order blueprint, holding asset unlisted");
            return Ok(PurchaseOutcome::PurchasedOnly {
                cost: payload.price,
            });
        };

        let listing = self.relist(&blueprint, payload.price, submitter).await?;
        let outcome = PurchaseOutcome::Listed {
            order_hash: listing.order_hash,
            expected_proceeds: listing.expected_proceeds_wei,
        };
        ledger.active_listings.push(listing);
        store.save(ledger).await?;
        Ok(outcome)
    }

    /// Construct, sign, validate, and publish the markup relisting.
    async fn relist(
        &self,
        blueprint: &OrderBlueprint,
        cost: U256,
        submitter: &mut TransactionSubmitter,
    ) -> Result<ActiveListing> {
        let standard = standard_for(blueprint.item_type)?;
        self.await_ownership(blueprint, standard).await?;
        self.ensure_conduit_approval(blueprint.collection, submitter)
            .await?;

        // For fungible balances, the reconciler needs to know what a full
        // fill leaves behind.
        let expected_post_sale_balance = match standard {
            TokenStandard::Erc721 => None,
            TokenStandard::Erc1155 => {
                let balance = self
                    .chain
                    .erc1155_balance(blueprint.collection, self.treasury, blueprint.token_id)
                    .await
                    .context("Failed to read balance for post-sale projection")?;
                Some(balance.saturating_sub(blueprint.quantity))
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let (order, expected_proceeds) = self.build_relist_order(blueprint, cost, now_ms)?;
        let order_hash = self.hasher.order_hash(&order);
        let digest = self.hasher.signing_digest(order_hash);
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .context("Failed to sign relist order")?;
        let signature_bytes = signature.as_bytes();

        submitter
            .submit_and_wait(&TxIntent {
                to: self.config.exchange,
                value: U256::ZERO,
                data: encode_validate_call(&order, &signature_bytes),
                label: "validate",
            })
            .await
            .context("On-chain order validation failed")?;

        // Publication is best-effort: the order is already valid on-chain,
        // so a marketplace hiccup must not discard the listing record.
        match self
            .marketplace
            .create_listing(&order, &signature_bytes, markup_total(cost, self.config.markup_bps))
            .await
        {
            Ok(receipt) => {
                if receipt.order_hash != order_hash {
                    warn!(
                        local = %order_hash,
                        remote = %receipt.order_hash,
                        "Marketplace disagrees on the order hash"
                    );
                }
            }
            Err(err) => {
                warn!(order_hash = %order_hash, error = %err, "Marketplace publication failed, order remains valid on-chain");
            }
        }

        info!(
            order_hash = %order_hash,
            collection = %blueprint.collection,
            token_id = %blueprint.token_id,
            expected_proceeds = %expected_proceeds,
            "Relisting active"
        );
        Ok(ActiveListing {
            order_hash,
            collection: blueprint.collection,
            token_id: blueprint.token_id,
            expected_proceeds_wei: expected_proceeds,
            listed_at_ms: now_ms,
            token_standard: standard,
            listed_quantity: blueprint.quantity,
            expected_post_sale_balance,
        })
    }

    /// Wait for the purchased asset to become visible in the treasury,
    /// tolerating indexer/propagation lag after the purchase.
    async fn await_ownership(
        &self,
        blueprint: &OrderBlueprint,
        standard: TokenStandard,
    ) -> Result<()> {
        for attempt in 1..=OWNERSHIP_POLL_ATTEMPTS {
            let owned = match standard {
                TokenStandard::Erc721 => self
                    .chain
                    .owner_of(blueprint.collection, blueprint.token_id)
                    .await
                    .map(|owner| owner == self.treasury),
                TokenStandard::Erc1155 => self
                    .chain
                    .erc1155_balance(blueprint.collection, self.treasury, blueprint.token_id)
                    .await
                    .map(|balance| balance >= blueprint.quantity),
            };
            match owned {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(attempt, "Asset not yet visible in treasury"),
                Err(err) => warn!(attempt, error = %err, "Ownership check failed"),
            }
            if attempt < OWNERSHIP_POLL_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(OWNERSHIP_POLL_DELAY_MS)).await;
            }
        }
        anyhow::bail!(
            "asset {}#{} not visible in treasury after {OWNERSHIP_POLL_ATTEMPTS} checks",
            blueprint.collection,
            blueprint.token_id
        )
    }

    /// One-time conduit approval per collection, submitted only when the
    /// on-chain allowance is missing.
    async fn ensure_conduit_approval(
        &self,
        collection: Address,
        submitter: &mut TransactionSubmitter,
    ) -> Result<()> {
        let approved = self
            .chain
            .is_approved_for_all(collection, self.treasury, self.config.conduit)
            .await
            .context("Failed to read conduit approval")?;
        if approved {
            return Ok(());
        }
        info!(collection = %collection, operator = %self.config.conduit, "Approving transfer conduit");
        submitter
            .submit_and_wait(&TxIntent {
                to: collection,
                value: U256::ZERO,
                data: abi::set_approval_for_all(self.config.conduit, true),
                label: "approval",
            })
            .await
            .context("Conduit approval failed")?;
        Ok(())
    }

    /// Rescale the blueprint's consideration to the markup total, redirect
    /// the seller's line to the treasury, and assemble the order.
    fn build_relist_order(
        &self,
        blueprint: &OrderBlueprint,
        cost: U256,
        now_ms: i64,
    ) -> Result<(OrderComponents, U256)> {
        anyhow::ensure!(
            !blueprint.consideration.is_empty(),
            "blueprint carries no consideration lines"
        );
        let total = markup_total(cost, self.config.markup_bps);
        let originals: Vec<U256> = blueprint.consideration.iter().map(|line| line.amount).collect();
        let scaled = rescale_amounts(&originals, total)?;

        let mut expected_proceeds = U256::ZERO;
        let mut consideration = Vec::with_capacity(scaled.len());
        for (line, amount) in blueprint.consideration.iter().zip(scaled) {
            let recipient = if line.seller_line {
                expected_proceeds += amount;
                self.treasury
            } else {
                line.recipient
            };
            consideration.push(ConsiderationItem {
                item_type: ItemType::Native,
                token: Address::ZERO,
                identifier_or_criteria: U256::ZERO,
                start_amount: amount,
                end_amount: amount,
                recipient,
            });
        }

        let start_time = U256::from((now_ms / 1000) as u64);
        let order = OrderComponents {
            offerer: self.treasury,
            zone: blueprint.zone,
            offer: vec![OfferItem {
                item_type: blueprint.item_type,
                token: blueprint.collection,
                identifier_or_criteria: blueprint.token_id,
                start_amount: blueprint.quantity,
                end_amount: blueprint.quantity,
            }],
            total_original_consideration_items: consideration.len(),
            consideration,
            order_type: blueprint.order_type,
            start_time,
            end_time: start_time + U256::from(self.config.relist_duration.as_secs()),
            zone_hash: blueprint.zone_hash,
            salt: U256::from(now_ms as u64),
            conduit_key: blueprint.conduit_key,
            counter: blueprint.counter,
        };
        Ok((order, expected_proceeds))
    }
}

fn standard_for(item_type: ItemType) -> Result<TokenStandard> {
    match item_type {
        ItemType::Erc721 | ItemType::Erc721WithCriteria => Ok(TokenStandard::Erc721),
        ItemType::Erc1155 | ItemType::Erc1155WithCriteria => Ok(TokenStandard::Erc1155),
        other => anyhow::bail!("offer item type {other:?} cannot be relisted"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
