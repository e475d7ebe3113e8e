//! Deterministic stubs for integration testing.
//!
//! Provides in-memory `ChainClient` and `Marketplace` implementations with
//! fully controllable state. Confirmed submissions apply scripted effects
//! (ownership grants, balance credits, approvals) so the services observe a
//! consistent little world.

use alloy_primitives::{Address, B256, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use flywheel::chain::{
    ChainClient, FeeQuote, TaxEvent, TxOutcome, TxReceipt, TxSubmission,
};
use flywheel::exchange::hash::OrderHasher;
use flywheel::exchange::OrderComponents;
use flywheel::marketplace::{
    AcquisitionTarget, ExecutionPayload, ListingReceipt, Marketplace,
};

// ---------------------------------------------------------------------------
// Stub chain
// ---------------------------------------------------------------------------

/// A mock chain for deterministic testing.
///
/// All state is in-memory and fully controllable from test code.
pub struct StubChain {
    pub treasury: Address,
    pub token: Address,
    head: Mutex<u64>,
    events: Mutex<Vec<TaxEvent>>,
    owners: Mutex<HashMap<(Address, U256), Address>>,
    erc1155_balances: Mutex<HashMap<(Address, U256, Address), U256>>,
    erc20_balances: Mutex<HashMap<(Address, Address), U256>>,
    conduit_approved: Mutex<bool>,
    buyback_open: Mutex<bool>,
    /// Tokens credited to the treasury when a "swap" submission lands.
    swap_credit: Mutex<U256>,
    /// Ownership granted when a "purchase" submission lands.
    purchase_effect: Mutex<Option<(Address, U256)>>,
    submissions: Mutex<Vec<TxSubmission>>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
    /// If set, only submissions with this label fail.
    fail_label: Mutex<Option<&'static str>>,
}

impl StubChain {
    pub fn new(treasury: Address, token: Address) -> Self {
        Self {
            treasury,
            token,
            head: Mutex::new(0),
            events: Mutex::new(Vec::new()),
            owners: Mutex::new(HashMap::new()),
            erc1155_balances: Mutex::new(HashMap::new()),
            erc20_balances: Mutex::new(HashMap::new()),
            conduit_approved: Mutex::new(false),
            buyback_open: Mutex::new(true),
            swap_credit: Mutex::new(U256::ZERO),
            purchase_effect: Mutex::new(None),
            submissions: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
            fail_label: Mutex::new(None),
        }
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap() = head;
    }

    pub fn push_event(&self, id: u64, amount: u64, block: u64) {
        self.events.lock().unwrap().push(TaxEvent {
            id: U256::from(id),
            recipient: self.treasury,
            amount: U256::from(amount),
            block_number: block,
        });
    }

    pub fn set_owner(&self, collection: Address, token_id: U256, owner: Address) {
        self.owners.lock().unwrap().insert((collection, token_id), owner);
    }

    pub fn set_swap_credit(&self, amount: u64) {
        *self.swap_credit.lock().unwrap() = U256::from(amount);
    }

    /// Script what a confirmed purchase transfers into the treasury.
    pub fn set_purchase_effect(&self, collection: Address, token_id: U256) {
        *self.purchase_effect.lock().unwrap() = Some((collection, token_id));
    }

    pub fn set_buyback_open(&self, open: bool) {
        *self.buyback_open.lock().unwrap() = open;
    }

    pub fn erc20_balance_of(&self, owner: Address) -> U256 {
        self.erc20_balances
            .lock()
            .unwrap()
            .get(&(self.token, owner))
            .copied()
            .unwrap_or_default()
    }

    /// All submissions accepted so far, in order.
    pub fn submissions(&self) -> Vec<TxSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|sub| sub.intent.label)
            .collect()
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Fail only submissions carrying the given label.
    pub fn fail_submissions_labeled(&self, label: &'static str) {
        *self.fail_label.lock().unwrap() = Some(label);
    }

    pub fn clear_submission_failure(&self) {
        *self.fail_label.lock().unwrap() = None;
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainClient for StubChain {
    async fn head_block(&self) -> Result<u64> {
        self.check_error()?;
        Ok(*self.head.lock().unwrap())
    }

    async fn pending_nonce(&self, _account: Address) -> Result<u64> {
        self.check_error()?;
        Ok(0)
    }

    async fn estimate_fees(&self) -> Result<FeeQuote> {
        Ok(FeeQuote::Eip1559 {
            max_fee_per_gas: U256::from(20u64),
            max_priority_fee_per_gas: U256::from(1u64),
        })
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(U256::from(10u64))
    }

    async fn submit(&self, submission: &TxSubmission) -> Result<B256> {
        self.check_error()?;
        if *self.fail_label.lock().unwrap() == Some(submission.intent.label) {
            return Err(anyhow!("execution reverted: scripted failure"));
        }
        self.submissions.lock().unwrap().push(submission.clone());

        // Apply the scripted world effect of the transaction.
        match submission.intent.label {
            "purchase" => {
                if let Some((collection, token_id)) = *self.purchase_effect.lock().unwrap() {
                    self.set_owner(collection, token_id, self.treasury);
                }
            }
            "approval" => {
                *self.conduit_approved.lock().unwrap() = true;
            }
            "swap" => {
                let credit = *self.swap_credit.lock().unwrap();
                let mut balances = self.erc20_balances.lock().unwrap();
                let entry = balances
                    .entry((self.token, self.treasury))
                    .or_insert(U256::ZERO);
                *entry += credit;
            }
            "burn" => {
                let mut balances = self.erc20_balances.lock().unwrap();
                if let Some(balance) = balances.get_mut(&(self.token, self.treasury)) {
                    *balance = U256::ZERO;
                }
            }
            _ => {}
        }

        let index = self.submissions.lock().unwrap().len() as u8;
        Ok(B256::with_last_byte(index))
    }

    async fn confirm(&self, tx_hash: B256) -> Result<TxOutcome> {
        self.check_error()?;
        Ok(TxOutcome::Confirmed(TxReceipt {
            tx_hash,
            block_number: *self.head.lock().unwrap(),
        }))
    }

    async fn proceeds_events(
        &self,
        _token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TaxEvent>> {
        self.check_error()?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| {
                event.recipient == recipient
                    && event.block_number >= from_block
                    && event.block_number <= to_block
            })
            .copied()
            .collect())
    }

    async fn owner_of(&self, collection: Address, token_id: U256) -> Result<Address> {
        self.check_error()?;
        self.owners
            .lock()
            .unwrap()
            .get(&(collection, token_id))
            .copied()
            .ok_or_else(|| anyhow!("ownerOf: unknown token {collection}#{token_id}"))
    }

    async fn erc1155_balance(
        &self,
        collection: Address,
        owner: Address,
        token_id: U256,
    ) -> Result<U256> {
        self.check_error()?;
        Ok(self
            .erc1155_balances
            .lock()
            .unwrap()
            .get(&(collection, token_id, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        self.check_error()?;
        Ok(self
            .erc20_balances
            .lock()
            .unwrap()
            .get(&(token, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn is_approved_for_all(
        &self,
        _collection: Address,
        _owner: Address,
        _operator: Address,
    ) -> Result<bool> {
        self.check_error()?;
        Ok(*self.conduit_approved.lock().unwrap())
    }

    async fn buyback_authorized(&self, _token: Address, _account: Address) -> Result<bool> {
        self.check_error()?;
        Ok(*self.buyback_open.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// Stub marketplace
// ---------------------------------------------------------------------------

/// A mock marketplace returning a scripted execution payload and hashing
/// published orders exactly like the verifier would.
pub struct StubMarketplace {
    hasher: OrderHasher,
    payload: Mutex<Option<ExecutionPayload>>,
    published: Mutex<Vec<(B256, U256)>>,
}

impl StubMarketplace {
    pub fn new(chain_id: u64, exchange: Address) -> Self {
        Self {
            hasher: OrderHasher::new(chain_id, exchange),
            payload: Mutex::new(None),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_payload(&self, payload: ExecutionPayload) {
        *self.payload.lock().unwrap() = Some(payload);
    }

    /// Published (order hash, price) pairs.
    pub fn published(&self) -> Vec<(B256, U256)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Marketplace for StubMarketplace {
    async fn best_execution(
        &self,
        _target: &AcquisitionTarget,
        _taker: Address,
    ) -> Result<Option<ExecutionPayload>> {
        // One-shot: the listing is gone once bought.
        Ok(self.payload.lock().unwrap().take())
    }

    async fn create_listing(
        &self,
        order: &OrderComponents,
        _signature: &[u8],
        price: U256,
    ) -> Result<ListingReceipt> {
        let order_hash = self.hasher.order_hash(order);
        self.published.lock().unwrap().push((order_hash, price));
        Ok(ListingReceipt {
            order_hash,
            seller_proceeds: price,
            listing_price: price,
        })
    }
}
