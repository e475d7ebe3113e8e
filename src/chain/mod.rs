//! Chain integration.
//!
//! Defines the `ChainClient` trait — the boundary to the chain-RPC
//! transport — plus the transaction/fee/event types that cross it, and the
//! nonce-cached, fee-escalating `TransactionSubmitter` built on top of it.

pub mod abi;
pub mod rpc;
pub mod submitter;

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Transaction types
// ---------------------------------------------------------------------------

/// What a service wants executed on chain. Nonce and fees are attached by
/// the submitter; signing and transport belong to the `ChainClient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntent {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// Short tag for logs ("purchase", "approval", "swap", "burn", ...).
    pub label: &'static str,
}

/// Fee pricing for one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeQuote {
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
    Legacy {
        gas_price: U256,
    },
}

impl FeeQuote {
    /// Scale by a percentage with ceiling rounding, so an escalation step
    /// never re-prices to the identical (and thus rejected) fee.
    pub fn scale(&self, pct: u64) -> FeeQuote {
        let scale = |v: U256| -> U256 {
            let hundred = U256::from(100u64);
            (v * U256::from(pct) + hundred - U256::from(1)) / hundred
        };
        match *self {
            FeeQuote::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeQuote::Eip1559 {
                max_fee_per_gas: scale(max_fee_per_gas),
                max_priority_fee_per_gas: scale(max_priority_fee_per_gas),
            },
            FeeQuote::Legacy { gas_price } => FeeQuote::Legacy {
                gas_price: scale(gas_price),
            },
        }
    }
}

/// A fully priced submission: what the transport signs and broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSubmission {
    pub intent: TxIntent,
    pub nonce: u64,
    pub fees: FeeQuote,
}

/// Confirmation data for a mined, successful transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Terminal outcome of waiting on a submitted transaction. The transport
/// owns the polling/timeout behavior and reports only the conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed(TxReceipt),
    Reverted { tx_hash: B256 },
    NotFound { tx_hash: B256 },
}

/// One matched "proceeds sent" event from the monitored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxEvent {
    pub id: U256,
    pub recipient: Address,
    pub amount: U256,
    pub block_number: u64,
}

// ---------------------------------------------------------------------------
// Chain client trait
// ---------------------------------------------------------------------------

/// Abstraction over the chain-RPC transport.
///
/// Read methods surface provider errors untouched; `submit` surfaces the
/// node's rejection message verbatim so the submitter can classify it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number.
    async fn head_block(&self) -> Result<u64>;

    /// Pending-state transaction count — the next usable nonce.
    async fn pending_nonce(&self, account: Address) -> Result<u64>;

    /// Priority-fee-aware estimate. Errors when the provider cannot quote
    /// EIP-1559 fees; callers fall back to `gas_price`.
    async fn estimate_fees(&self) -> Result<FeeQuote>;

    /// Flat legacy gas price.
    async fn gas_price(&self) -> Result<U256>;

    /// Sign and broadcast. Returns the transaction hash.
    async fn submit(&self, submission: &TxSubmission) -> Result<B256>;

    /// Wait for a terminal outcome of a broadcast transaction.
    async fn confirm(&self, tx_hash: B256) -> Result<TxOutcome>;

    /// "Proceeds sent" events emitted by `token` to `recipient` over the
    /// inclusive block range.
    async fn proceeds_events(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TaxEvent>>;

    /// ERC-721 `ownerOf`.
    async fn owner_of(&self, collection: Address, token_id: U256) -> Result<Address>;

    /// ERC-1155 `balanceOf(owner, id)`.
    async fn erc1155_balance(
        &self,
        collection: Address,
        owner: Address,
        token_id: U256,
    ) -> Result<U256>;

    /// ERC-20 `balanceOf(owner)`.
    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256>;

    /// ERC-721/1155 `isApprovedForAll(owner, operator)`.
    async fn is_approved_for_all(
        &self,
        collection: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool>;

    /// Whether `account` may route buybacks through the token's swap entry.
    async fn buyback_authorized(&self, token: Address, account: Address) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
