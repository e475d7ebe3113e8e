//! Shared types for the FLYWHEEL agent.
//!
//! These types form the financial data model used across all modules.
//! They are designed to be stable so that storage, chain, and engine
//! modules can depend on them without circular references.

use alloy_primitives::{Address, B256, U256};
use std::fmt;
use std::str::FromStr;

/// Current ledger schema version. Loads clamp older snapshots up to this.
pub const LEDGER_VERSION: u32 = 2;

/// Oldest version a loaded ledger is allowed to report.
pub const MIN_LEDGER_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Token standard
// ---------------------------------------------------------------------------

/// The two supported asset kinds, decided once at listing-creation time and
/// carried on the listing so the reconciler never re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStandard {
    /// Exclusive ownership — a sale is an ownership change (ERC-721).
    Erc721,
    /// Quantity balances — a sale is a balance drop (ERC-1155).
    Erc1155,
}

impl TokenStandard {
    /// Stable tag used in the durable store.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStandard::Erc721 => "erc721",
            TokenStandard::Erc1155 => "erc1155",
        }
    }
}

impl fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStandard {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "erc721" => Ok(TokenStandard::Erc721),
            "erc1155" => Ok(TokenStandard::Erc1155),
            other => Err(anyhow::anyhow!("unknown token standard tag: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Active listing
// ---------------------------------------------------------------------------

/// An exchange order we have signed and validated on-chain, awaiting a sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveListing {
    /// Order hash — unique id, also the key in the durable store.
    pub order_hash: B256,
    pub collection: Address,
    pub token_id: U256,
    /// What the treasury's consideration line pays out when the order fills.
    pub expected_proceeds_wei: U256,
    /// Unix milliseconds at listing time. Insertion order == processing order.
    pub listed_at_ms: i64,
    pub token_standard: TokenStandard,
    pub listed_quantity: U256,
    /// Balance we expect to hold after a full fill. Only meaningful for
    /// fungible-balance listings; the reconciler defaults it to zero.
    pub expected_post_sale_balance: Option<U256>,
}

impl fmt::Display for ActiveListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}#{} qty={} proceeds={}wei",
            self.token_standard,
            self.collection,
            self.token_id,
            self.listed_quantity,
            self.expected_proceeds_wei,
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The process-owned financial state machine.
///
/// Mutated exclusively by the four tick services and persisted at their
/// safe boundaries. Pools never go negative; `last_tax_block` only advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    pub version: u32,
    /// Transfer-tax proceeds available for NFT purchases.
    pub commission_pool_wei: U256,
    /// Captured sale proceeds awaiting buyback-and-burn.
    pub sale_pool_wei: U256,
    /// Nonzero exactly while a swap has completed but its burn has not.
    pub pending_burn_amount: U256,
    /// Native value the pending burn's swap consumed, debited on burn.
    pub pending_burn_cost_wei: U256,
    /// Highest block already scanned for tax events.
    pub last_tax_block: u64,
    /// Ordered by listing time; the reconciler processes from the front.
    pub active_listings: Vec<ActiveListing>,
}

impl Ledger {
    /// Fresh ledger for a first run. Tax scanning starts after `initial_block`.
    pub fn new(initial_block: u64) -> Self {
        Self {
            version: LEDGER_VERSION,
            commission_pool_wei: U256::ZERO,
            sale_pool_wei: U256::ZERO,
            pending_burn_amount: U256::ZERO,
            pending_burn_cost_wei: U256::ZERO,
            last_tax_block: initial_block,
            active_listings: Vec::new(),
        }
    }

    /// Whether a swap completed without its burn confirming yet.
    pub fn has_pending_burn(&self) -> bool {
        self.pending_burn_amount > U256::ZERO
    }

    /// Credit collected tax proceeds into the commission pool.
    pub fn credit_commission(&mut self, amount: U256) {
        self.commission_pool_wei += amount;
    }

    /// Advance the tax scan watermark. Never rewinds.
    pub fn advance_tax_block(&mut self, block: u64) {
        self.last_tax_block = self.last_tax_block.max(block);
    }

    /// Deduct a confirmed purchase from the commission pool.
    /// Errors if the cost exceeds the pool (the orchestrator gates on price).
    pub fn debit_commission(&mut self, cost: U256) -> anyhow::Result<()> {
        self.commission_pool_wei = self
            .commission_pool_wei
            .checked_sub(cost)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "purchase cost {cost} exceeds commission pool {}",
                    self.commission_pool_wei
                )
            })?;
        Ok(())
    }

    /// Credit captured sale proceeds.
    pub fn credit_sale(&mut self, proceeds: U256) {
        self.sale_pool_wei += proceeds;
    }

    /// Record a completed swap awaiting its burn. The crash-recovery boundary.
    pub fn record_pending_burn(&mut self, amount: U256, cost_wei: U256) {
        self.pending_burn_amount = amount;
        self.pending_burn_cost_wei = cost_wei;
    }

    /// Clear the pending burn and debit its cost, capped at the current pool
    /// so the pool can never go negative.
    pub fn settle_burn(&mut self) {
        let debit = self.pending_burn_cost_wei.min(self.sale_pool_wei);
        self.sale_pool_wei -= debit;
        self.pending_burn_amount = U256::ZERO;
        self.pending_burn_cost_wei = U256::ZERO;
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "commission={}wei sale={}wei pending_burn={} listings={} tax_block={}",
            self.commission_pool_wei,
            self.sale_pool_wei,
            self.pending_burn_amount,
            self.active_listings.len(),
            self.last_tax_block,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for FLYWHEEL.
#[derive(Debug, thiserror::Error)]
pub enum FlywheelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("Transaction {tx_hash} not found after confirmation window")]
    ReceiptMissing { tx_hash: B256 },

    #[error("Marketplace error: {0}")]
    Marketplace(String),

    /// A failed commit. Fatal: the process must not keep running while
    /// believing a persist happened when it did not.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl FlywheelError {
    /// Whether this error must terminate the process rather than be left
    /// for the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlywheelError::Storage(_) | FlywheelError::Config(_))
    }
}

/// Check an `anyhow` chain for a fatal domain error.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<FlywheelError>())
        .any(FlywheelError::is_fatal)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn listing(ts: i64) -> ActiveListing {
        ActiveListing {
            order_hash: B256::with_last_byte(ts as u8),
            collection: address!("00000000000000000000000000000000000000aa"),
            token_id: U256::from(7),
            expected_proceeds_wei: U256::from(1300),
            listed_at_ms: ts,
            token_standard: TokenStandard::Erc721,
            listed_quantity: U256::from(1),
            expected_post_sale_balance: None,
        }
    }

    #[test]
    fn test_standard_tag_roundtrip() {
        for std in [TokenStandard::Erc721, TokenStandard::Erc1155] {
            assert_eq!(std.as_str().parse::<TokenStandard>().unwrap(), std);
        }
        assert!("erc20".parse::<TokenStandard>().is_err());
    }

    #[test]
    fn test_tax_block_never_rewinds() {
        let mut ledger = Ledger::new(100);
        ledger.advance_tax_block(150);
        assert_eq!(ledger.last_tax_block, 150);
        ledger.advance_tax_block(120);
        assert_eq!(ledger.last_tax_block, 150);
    }

    #[test]
    fn test_debit_commission_rejects_overdraft() {
        let mut ledger = Ledger::new(0);
        ledger.credit_commission(U256::from(1000));
        assert!(ledger.debit_commission(U256::from(1001)).is_err());
        assert_eq!(ledger.commission_pool_wei, U256::from(1000));
        ledger.debit_commission(U256::from(1000)).unwrap();
        assert_eq!(ledger.commission_pool_wei, U256::ZERO);
    }

    #[test]
    fn test_settle_burn_caps_debit_at_pool() {
        let mut ledger = Ledger::new(0);
        ledger.credit_sale(U256::from(500));
        ledger.record_pending_burn(U256::from(10_000), U256::from(800));
        assert!(ledger.has_pending_burn());

        ledger.settle_burn();
        // Cost 800 exceeds the pool of 500 — debit is capped, never negative.
        assert_eq!(ledger.sale_pool_wei, U256::ZERO);
        assert!(!ledger.has_pending_burn());
        assert_eq!(ledger.pending_burn_cost_wei, U256::ZERO);
    }

    #[test]
    fn test_listing_order_is_insertion_order() {
        let mut ledger = Ledger::new(0);
        ledger.active_listings.push(listing(1));
        ledger.active_listings.push(listing(2));
        ledger.active_listings.push(listing(3));
        let stamps: Vec<i64> =
            ledger.active_listings.iter().map(|l| l.listed_at_ms).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_fatal_classification() {
        let storage = anyhow::Error::new(FlywheelError::Storage("disk full".into()));
        assert!(is_fatal(&storage));

        let revert = anyhow::Error::new(FlywheelError::Reverted { tx_hash: B256::ZERO });
        assert!(!is_fatal(&revert));

        let wrapped = storage.context("while saving ledger");
        assert!(is_fatal(&wrapped));
    }
}
