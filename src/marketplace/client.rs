//! Aggregator API client.
//!
//! Talks to the marketplace aggregator over JSON/HTTP: quote-and-execute
//! for purchases, order publication for relistings. Auth is an API key
//! header; all big integers travel as decimal strings.

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    AcquisitionTarget, BlueprintLine, ExecutionPayload, ListingReceipt, Marketplace,
    OrderBlueprint,
};
use crate::exchange::{ItemType, OrderComponents, OrderType};
use crate::types::FlywheelError;

// ---------------------------------------------------------------------------
// API response types (aggregator JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyResponse {
    /// Absent when the target has no live listing.
    #[serde(default)]
    router: Option<String>,
    #[serde(default)]
    calldata: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    order: Option<BuyOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyOrder {
    collection: String,
    token_id: String,
    item_type: u8,
    #[serde(default)]
    quantity: Option<String>,
    consideration: Vec<BuyConsideration>,
    zone: String,
    zone_hash: String,
    conduit_key: String,
    order_type: u8,
    counter: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyConsideration {
    recipient: String,
    amount: String,
    #[serde(default)]
    seller_line: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    order_hash: String,
    seller_proceeds: String,
    listing_price: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AggregatorClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    chain_id: u64,
}

impl AggregatorClient {
    pub fn new(base_url: String, api_key: SecretString, chain_id: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("FLYWHEEL/0.1.0 (treasury-agent)")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            chain_id,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Marketplace request failed: {path}"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read marketplace response")?;
        if !status.is_success() {
            return Err(FlywheelError::Marketplace(format!("{path}: HTTP {status}: {text}")).into());
        }
        serde_json::from_str(&text)
            .with_context(|| format!("Malformed marketplace response from {path}"))
    }
}

#[async_trait]
impl Marketplace for AggregatorClient {
    async fn best_execution(
        &self,
        target: &AcquisitionTarget,
        taker: Address,
    ) -> Result<Option<ExecutionPayload>> {
        let mut body = json!({
            "chainId": self.chain_id,
            "taker": taker.to_string(),
        });
        match target {
            AcquisitionTarget::Token { collection, token_id } => {
                body["collection"] = json!(collection.to_string());
                body["tokenId"] = json!(token_id.to_string());
            }
            AcquisitionTarget::Collection { slug } => {
                body["slug"] = json!(slug);
            }
        }

        let raw = self.post("/execute/buy", body).await?;
        let response: BuyResponse =
            serde_json::from_value(raw).context("Malformed buy response")?;
        match parse_execution(response)? {
            Some(payload) => {
                debug!(target = %target, price = %payload.price, "Execution payload fetched");
                Ok(Some(payload))
            }
            None => {
                debug!(target = %target, "No live listing for target");
                Ok(None)
            }
        }
    }

    async fn create_listing(
        &self,
        order: &OrderComponents,
        signature: &[u8],
        price: U256,
    ) -> Result<ListingReceipt> {
        let consideration: Vec<serde_json::Value> = order
            .consideration
            .iter()
            .map(|item| {
                json!({
                    "itemType": item.item_type as u8,
                    "token": item.token.to_string(),
                    "identifierOrCriteria": item.identifier_or_criteria.to_string(),
                    "startAmount": item.start_amount.to_string(),
                    "endAmount": item.end_amount.to_string(),
                    "recipient": item.recipient.to_string(),
                })
            })
            .collect();
        let offer: Vec<serde_json::Value> = order
            .offer
            .iter()
            .map(|item| {
                json!({
                    "itemType": item.item_type as u8,
                    "token": item.token.to_string(),
                    "identifierOrCriteria": item.identifier_or_criteria.to_string(),
                    "startAmount": item.start_amount.to_string(),
                    "endAmount": item.end_amount.to_string(),
                })
            })
            .collect();

        let body = json!({
            "chainId": self.chain_id,
            "price": price.to_string(),
            "signature": format!("0x{}", hex_encode(signature)),
            "order": {
                "offerer": order.offerer.to_string(),
                "zone": order.zone.to_string(),
                "offer": offer,
                "consideration": consideration,
                "orderType": order.order_type as u8,
                "startTime": order.start_time.to_string(),
                "endTime": order.end_time.to_string(),
                "zoneHash": order.zone_hash.to_string(),
                "salt": order.salt.to_string(),
                "conduitKey": order.conduit_key.to_string(),
                "totalOriginalConsiderationItems": order.total_original_consideration_items,
                "counter": order.counter.to_string(),
            },
        });

        let raw = self.post("/listings", body).await?;
        let response: ListResponse =
            serde_json::from_value(raw).context("Malformed listing response")?;

        let receipt = ListingReceipt {
            order_hash: response
                .order_hash
                .parse::<B256>()
                .context("Invalid order hash in listing response")?,
            seller_proceeds: parse_dec(&response.seller_proceeds)?,
            listing_price: parse_dec(&response.listing_price)?,
        };
        info!(order_hash = %receipt.order_hash, price = %receipt.listing_price, "Listing published");
        Ok(receipt)
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn parse_execution(response: BuyResponse) -> Result<Option<ExecutionPayload>> {
    let (Some(router), Some(calldata), Some(price)) =
        (response.router, response.calldata, response.price)
    else {
        return Ok(None);
    };

    let blueprint = response.order.map(parse_blueprint).transpose()?;
    Ok(Some(ExecutionPayload {
        router: router.parse::<Address>().context("Invalid router address")?,
        calldata: calldata.parse::<Bytes>().context("Invalid calldata")?,
        value: parse_dec(response.value.as_deref().unwrap_or("0"))?,
        price: parse_dec(&price)?,
        blueprint,
    }))
}

fn parse_blueprint(order: BuyOrder) -> Result<OrderBlueprint> {
    let consideration = order
        .consideration
        .into_iter()
        .map(|line| {
            Ok(BlueprintLine {
                recipient: line
                    .recipient
                    .parse::<Address>()
                    .context("Invalid consideration recipient")?,
                amount: parse_dec(&line.amount)?,
                seller_line: line.seller_line,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OrderBlueprint {
        collection: order
            .collection
            .parse::<Address>()
            .context("Invalid blueprint collection")?,
        token_id: parse_dec(&order.token_id)?,
        item_type: ItemType::from_u8(order.item_type)?,
        quantity: match order.quantity.as_deref() {
            None => U256::from(1),
            Some(quantity) => parse_dec(quantity)?,
        },
        consideration,
        zone: order.zone.parse::<Address>().context("Invalid zone")?,
        zone_hash: order.zone_hash.parse::<B256>().context("Invalid zone hash")?,
        conduit_key: order
            .conduit_key
            .parse::<B256>()
            .context("Invalid conduit key")?,
        order_type: OrderType::from_u8(order.order_type)?,
        counter: parse_dec(&order.counter)?,
    })
}

fn parse_dec(s: &str) -> Result<U256> {
    U256::from_str_radix(s, 10).with_context(|| format!("Invalid decimal integer: {s:?}"))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
