//! JSON-RPC chain transport.
//!
//! Implements `ChainClient` over a plain HTTP JSON-RPC endpoint. Write
//! transactions are signed locally and broadcast raw; node rejection
//! messages are surfaced verbatim for the submitter's classifier. This
//! transport also owns the confirmation-polling window.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::{abi, ChainClient, FeeQuote, TaxEvent, TxOutcome, TxReceipt, TxSubmission};

/// Canonical signature of the monitored token's tax-proceeds event.
const PROCEEDS_EVENT: &str = "ProceedsSent(uint256,address,uint256)";

/// How many times a missing receipt is re-polled before giving up.
const RECEIPT_POLL_ATTEMPTS: u32 = 30;
/// Delay between receipt polls.
const RECEIPT_POLL_DELAY_MS: u64 = 2_000;

/// Headroom applied on top of `eth_estimateGas` (denominator of 1/N).
const GAS_HEADROOM_DIV: u64 = 5;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpChainClient {
    http: Client,
    url: String,
    chain_id: u64,
    signer: PrivateKeySigner,
}

impl HttpChainClient {
    pub fn new(url: String, chain_id: u64, signer: PrivateKeySigner) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("FLYWHEEL/0.1.0 (treasury-agent)")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url,
            chain_id,
            signer,
        })
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct RpcResponse {
            result: Option<Value>,
            error: Option<RpcError>,
        }
        #[derive(Deserialize)]
        struct RpcError {
            code: i64,
            message: String,
        }

        trace!(method, "RPC request");
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC transport failure: {method}"))?
            .json()
            .await
            .with_context(|| format!("Malformed RPC response: {method}"))?;

        if let Some(error) = response.error {
            // The node's message text is load-bearing: the submitter
            // classifies rejections by it.
            return Err(anyhow!("{method}: {} (code {})", error.message, error.code));
        }
        response
            .result
            .ok_or_else(|| anyhow!("{method}: response carried neither result nor error"))
    }

    async fn eth_call(&self, to: Address, data: Bytes) -> Result<Vec<u8>> {
        let result = self
            .rpc(
                "eth_call",
                json!([{"to": to.to_string(), "data": data.to_string()}, "latest"]),
            )
            .await?;
        parse_hex_bytes(&result)
    }

    async fn estimate_gas(&self, submission: &TxSubmission) -> Result<u64> {
        let result = self
            .rpc(
                "eth_estimateGas",
                json!([{
                    "from": self.sender().to_string(),
                    "to": submission.intent.to.to_string(),
                    "value": format!("{:#x}", submission.intent.value),
                    "data": submission.intent.data.to_string(),
                }]),
            )
            .await?;
        let estimate = parse_quantity_u64(&result)?;
        Ok(estimate + estimate / GAS_HEADROOM_DIV)
    }

    fn sign_raw(&self, submission: &TxSubmission, gas_limit: u64) -> Result<Vec<u8>> {
        let envelope = match submission.fees {
            FeeQuote::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = TxEip1559 {
                    chain_id: self.chain_id,
                    nonce: submission.nonce,
                    gas_limit,
                    max_fee_per_gas: to_u128(max_fee_per_gas)?,
                    max_priority_fee_per_gas: to_u128(max_priority_fee_per_gas)?,
                    to: TxKind::Call(submission.intent.to),
                    value: submission.intent.value,
                    access_list: Default::default(),
                    input: submission.intent.data.clone(),
                };
                let signature = self
                    .signer
                    .sign_transaction_sync(&mut tx)
                    .context("Failed to sign transaction")?;
                TxEnvelope::Eip1559(tx.into_signed(signature))
            }
            FeeQuote::Legacy { gas_price } => {
                let mut tx = TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce: submission.nonce,
                    gas_price: to_u128(gas_price)?,
                    gas_limit,
                    to: TxKind::Call(submission.intent.to),
                    value: submission.intent.value,
                    input: submission.intent.data.clone(),
                };
                let signature = self
                    .signer
                    .sign_transaction_sync(&mut tx)
                    .context("Failed to sign transaction")?;
                TxEnvelope::Legacy(tx.into_signed(signature))
            }
        };
        Ok(envelope.encoded_2718())
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn head_block(&self) -> Result<u64> {
        parse_quantity_u64(&self.rpc("eth_blockNumber", json!([])).await?)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64> {
        parse_quantity_u64(
            &self
                .rpc(
                    "eth_getTransactionCount",
                    json!([account.to_string(), "pending"]),
                )
                .await?,
        )
    }

    async fn estimate_fees(&self) -> Result<FeeQuote> {
        let priority =
            parse_quantity_u256(&self.rpc("eth_maxPriorityFeePerGas", json!([])).await?)?;
        let block = self
            .rpc("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee = block
            .get("baseFeePerGas")
            .filter(|v| !v.is_null())
            .ok_or_else(|| anyhow!("latest block carries no baseFeePerGas"))
            .and_then(parse_quantity_u256)?;
        Ok(FeeQuote::Eip1559 {
            max_fee_per_gas: base_fee * U256::from(2) + priority,
            max_priority_fee_per_gas: priority,
        })
    }

    async fn gas_price(&self) -> Result<U256> {
        parse_quantity_u256(&self.rpc("eth_gasPrice", json!([])).await?)
    }

    async fn submit(&self, submission: &TxSubmission) -> Result<B256> {
        let gas_limit = self.estimate_gas(submission).await?;
        let raw = self.sign_raw(submission, gas_limit)?;
        let result = self
            .rpc(
                "eth_sendRawTransaction",
                json!([Bytes::from(raw).to_string()]),
            )
            .await?;
        result
            .as_str()
            .context("eth_sendRawTransaction returned a non-string")?
            .parse::<B256>()
            .context("Invalid transaction hash")
    }

    async fn confirm(&self, tx_hash: B256) -> Result<TxOutcome> {
        for attempt in 0..RECEIPT_POLL_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(RECEIPT_POLL_DELAY_MS)).await;
            }
            let receipt = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
                .await?;
            if receipt.is_null() {
                continue;
            }
            let status = parse_quantity_u64(
                receipt
                    .get("status")
                    .ok_or_else(|| anyhow!("receipt missing status"))?,
            )?;
            if status == 0 {
                return Ok(TxOutcome::Reverted { tx_hash });
            }
            let block_number = parse_quantity_u64(
                receipt
                    .get("blockNumber")
                    .ok_or_else(|| anyhow!("receipt missing blockNumber"))?,
            )?;
            return Ok(TxOutcome::Confirmed(TxReceipt {
                tx_hash,
                block_number,
            }));
        }
        Ok(TxOutcome::NotFound { tx_hash })
    }

    async fn proceeds_events(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TaxEvent>> {
        let topic0 = keccak256(PROCEEDS_EVENT.as_bytes());
        let recipient_topic = B256::from(abi::addr_word(recipient));
        let logs = self
            .rpc(
                "eth_getLogs",
                json!([{
                    "address": token.to_string(),
                    "fromBlock": format!("{from_block:#x}"),
                    "toBlock": format!("{to_block:#x}"),
                    "topics": [topic0.to_string(), recipient_topic.to_string()],
                }]),
            )
            .await?;

        let entries = logs.as_array().context("eth_getLogs returned a non-array")?;
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            events.push(parse_proceeds_log(entry, recipient)?);
        }
        debug!(
            token = %token,
            from_block,
            to_block,
            count = events.len(),
            "Proceeds events fetched"
        );
        Ok(events)
    }

    async fn owner_of(&self, collection: Address, token_id: U256) -> Result<Address> {
        let ret = self.eth_call(collection, abi::owner_of(token_id)).await?;
        abi::decode_address(&ret)
    }

    async fn erc1155_balance(
        &self,
        collection: Address,
        owner: Address,
        token_id: U256,
    ) -> Result<U256> {
        let ret = self
            .eth_call(collection, abi::erc1155_balance_of(owner, token_id))
            .await?;
        abi::decode_uint(&ret)
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let ret = self.eth_call(token, abi::erc20_balance_of(owner)).await?;
        abi::decode_uint(&ret)
    }

    async fn is_approved_for_all(
        &self,
        collection: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool> {
        let ret = self
            .eth_call(collection, abi::is_approved_for_all(owner, operator))
            .await?;
        abi::decode_bool(&ret)
    }

    async fn buyback_authorized(&self, token: Address, account: Address) -> Result<bool> {
        let ret = self.eth_call(token, abi::buyback_authorized(account)).await?;
        abi::decode_bool(&ret)
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_quantity_u64(value: &Value) -> Result<u64> {
    let s = value.as_str().context("expected a hex quantity string")?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {s:?}"))
}

fn parse_quantity_u256(value: &Value) -> Result<U256> {
    let s = value.as_str().context("expected a hex quantity string")?;
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {s:?}"))
}

fn parse_hex_bytes(value: &Value) -> Result<Vec<u8>> {
    let s = value.as_str().context("expected hex data string")?;
    Ok(s.parse::<Bytes>()
        .with_context(|| format!("Invalid hex data: {s:?}"))?
        .to_vec())
}

/// Decode one `ProceedsSent` log entry: recipient indexed in topic 1,
/// id and amount in the data words.
fn parse_proceeds_log(entry: &Value, expected_recipient: Address) -> Result<TaxEvent> {
    let topics = entry
        .get("topics")
        .and_then(Value::as_array)
        .context("log entry missing topics")?;
    let recipient_topic = topics
        .get(1)
        .and_then(Value::as_str)
        .context("proceeds log missing recipient topic")?
        .parse::<B256>()
        .context("Invalid recipient topic")?;
    let recipient = Address::from_slice(&recipient_topic.as_slice()[12..]);
    if recipient != expected_recipient {
        // The node already filtered by topic; a mismatch means a
        // misconfigured filter, not a skippable log.
        anyhow::bail!("proceeds log recipient {recipient} != treasury {expected_recipient}");
    }

    let data = parse_hex_bytes(entry.get("data").context("log entry missing data")?)?;
    if data.len() < 64 {
        anyhow::bail!("proceeds log data too short: {} bytes", data.len());
    }
    Ok(TaxEvent {
        id: U256::from_be_slice(&data[..32]),
        recipient,
        amount: U256::from_be_slice(&data[32..64]),
        block_number: parse_quantity_u64(
            entry.get("blockNumber").context("log entry missing blockNumber")?,
        )?,
    })
}

fn to_u128(v: U256) -> Result<u128> {
    u128::try_from(v).map_err(|_| anyhow!("fee value exceeds u128: {v}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
