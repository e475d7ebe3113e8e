//! Marketplace integration.
//!
//! Defines the `Marketplace` trait — the boundary to the order-discovery
//! API used to buy the target asset and to publish relistings — and the
//! payload types that cross it.

pub mod client;

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::exchange::{ItemType, OrderComponents, OrderType};

// ---------------------------------------------------------------------------
// Acquisition target
// ---------------------------------------------------------------------------

/// What the treasury is shopping for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionTarget {
    /// One exact asset.
    Token { collection: Address, token_id: U256 },
    /// Best available listing in a collection, addressed by marketplace slug.
    Collection { slug: String },
}

impl fmt::Display for AcquisitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionTarget::Token { collection, token_id } => {
                write!(f, "{collection}#{token_id}")
            }
            AcquisitionTarget::Collection { slug } => write!(f, "collection:{slug}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One consideration line from the purchased order, before rescaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintLine {
    pub recipient: Address,
    pub amount: U256,
    /// Marks the seller's own proceeds line; the relist redirects it to us.
    pub seller_line: bool,
}

/// Normalized shape of the order we just filled — everything needed to
/// construct a compatible relisting of the same asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBlueprint {
    pub collection: Address,
    pub token_id: U256,
    pub item_type: ItemType,
    pub quantity: U256,
    pub consideration: Vec<BlueprintLine>,
    pub zone: Address,
    pub zone_hash: B256,
    pub conduit_key: B256,
    pub order_type: OrderType,
    pub counter: U256,
}

/// Ready-to-submit purchase: a router call plus its quoted price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPayload {
    pub router: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub price: U256,
    pub blueprint: Option<OrderBlueprint>,
}

/// Result of publishing a relisting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingReceipt {
    pub order_hash: B256,
    pub seller_proceeds: U256,
    pub listing_price: U256,
}

// ---------------------------------------------------------------------------
// Marketplace trait
// ---------------------------------------------------------------------------

/// Abstraction over the marketplace/aggregator API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Best-priced execution payload for the target, or `None` when nothing
    /// is listed.
    async fn best_execution(
        &self,
        target: &AcquisitionTarget,
        taker: Address,
    ) -> Result<Option<ExecutionPayload>>;

    /// Publish a signed order so takers can discover it.
    async fn create_listing(
        &self,
        order: &OrderComponents,
        signature: &[u8],
        price: U256,
    ) -> Result<ListingReceipt>;
}
