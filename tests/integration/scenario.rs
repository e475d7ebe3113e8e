//! End-to-end treasury flow over the deterministic stubs.
//!
//! Walks the full cycle: tax scan → purchase-and-relist → sale detection →
//! buyback-and-burn, asserting the ledger at every safe boundary, plus the
//! crash-resume path of the burn phase.

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_signer_local::PrivateKeySigner;
use std::sync::Arc;
use std::time::Duration;

use flywheel::chain::submitter::TransactionSubmitter;
use flywheel::chain::ChainClient;
use flywheel::engine::buyback::{BuybackBurnEngine, BuybackOutcome};
use flywheel::engine::purchase::{PurchaseConfig, PurchaseOrchestrator, PurchaseOutcome};
use flywheel::engine::reconciler::ListingReconciler;
use flywheel::engine::tax::TaxCollector;
use flywheel::exchange::hash::OrderHasher;
use flywheel::exchange::{ItemType, OrderType};
use flywheel::marketplace::{AcquisitionTarget, BlueprintLine, ExecutionPayload, OrderBlueprint};
use flywheel::storage::{self, LedgerStore};
use flywheel::types::Ledger;

use crate::stubs::{StubChain, StubMarketplace};

const CHAIN_ID: u64 = 1;
const EXCHANGE: Address = address!("0000000000000068f116a894984e2db1123eb395");
const CONDUIT: Address = address!("1e0049783f008a0085193e00003d00cd54003c71");
const COLLECTION: Address = address!("00000000000000000000000000000000000000aa");
const TOKEN: Address = address!("00000000000000000000000000000000000000dd");
const ROUTER: Address = address!("0000000000000000000000000000000000000f0f");
const BUYER: Address = address!("0000000000000000000000000000000000002222");

const TOKEN_ID: u64 = 7;

struct World {
    chain: Arc<StubChain>,
    marketplace: Arc<StubMarketplace>,
    store: LedgerStore,
    submitter: TransactionSubmitter,
    tax: TaxCollector,
    reconciler: ListingReconciler,
    purchase: PurchaseOrchestrator,
    buyback: BuybackBurnEngine,
    treasury: Address,
}

async fn world() -> World {
    let signer: PrivateKeySigner =
        "0x0000000000000000000000000000000000000000000000000000000000000001"
            .parse()
            .unwrap();
    let treasury = signer.address();

    let chain = Arc::new(StubChain::new(treasury, TOKEN));
    let chain_dyn: Arc<dyn ChainClient> = chain.clone();
    let marketplace = Arc::new(StubMarketplace::new(CHAIN_ID, EXCHANGE));

    let mut db_path = std::env::temp_dir();
    db_path.push(format!("flywheel_test_scenario_{}.db", uuid::Uuid::new_v4()));
    let store = LedgerStore::open(&db_path.to_string_lossy()).await.unwrap();

    let submitter = TransactionSubmitter::new(chain_dyn.clone(), treasury);
    let tax = TaxCollector::new(chain_dyn.clone(), TOKEN, treasury, 10, Duration::ZERO);
    let reconciler = ListingReconciler::new(chain_dyn.clone(), treasury, 5);
    let buyback = BuybackBurnEngine::new(chain_dyn.clone(), TOKEN, treasury, None);
    let purchase = PurchaseOrchestrator::new(
        chain_dyn,
        marketplace.clone(),
        OrderHasher::new(CHAIN_ID, EXCHANGE),
        signer,
        treasury,
        PurchaseConfig {
            target: AcquisitionTarget::Token {
                collection: COLLECTION,
                token_id: U256::from(TOKEN_ID),
            },
            exchange: EXCHANGE,
            conduit: CONDUIT,
            markup_bps: 10_833,
            relist_duration: Duration::from_secs(86_400),
        },
    );

    World {
        chain,
        marketplace,
        store,
        submitter,
        tax,
        reconciler,
        purchase,
        buyback,
        treasury,
    }
}

/// The §1200-for-1300 flip: a single seller proceeds line, so the relist's
/// whole markup total flows back to the treasury.
fn flip_payload() -> ExecutionPayload {
    ExecutionPayload {
        router: ROUTER,
        calldata: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
        value: U256::from(1_200u64),
        price: U256::from(1_200u64),
        blueprint: Some(OrderBlueprint {
            collection: COLLECTION,
            token_id: U256::from(TOKEN_ID),
            item_type: ItemType::Erc721,
            quantity: U256::from(1),
            consideration: vec![BlueprintLine {
                recipient: BUYER,
                amount: U256::from(1_200u64),
                seller_line: true,
            }],
            zone: Address::ZERO,
            zone_hash: Default::default(),
            conduit_key: Default::default(),
            order_type: OrderType::FullOpen,
            counter: U256::ZERO,
        }),
    }
}

#[tokio::test]
async fn test_full_flywheel_cycle() {
    let mut w = world().await;

    // Start: commission 1000, sale 0, watermark at block 9.
    let mut ledger = Ledger::new(9);
    ledger.credit_commission(U256::from(1_000));
    w.store.save(&ledger).await.unwrap();

    // --- Tax scan over blocks 10–15 finds one event of 500 ---------------
    w.chain.set_head(15);
    w.chain.push_event(1, 500, 12);
    let summary = w.tax.collect(&mut ledger, &w.store).await.unwrap();
    assert_eq!(summary.events, 1);
    assert_eq!(ledger.commission_pool_wei, U256::from(1_500));
    assert_eq!(ledger.last_tax_block, 15);

    // --- Purchase at 1200, relist at 1300 --------------------------------
    w.chain.set_purchase_effect(COLLECTION, U256::from(TOKEN_ID));
    w.marketplace.set_payload(flip_payload());
    let outcome = w
        .purchase
        .run(&mut ledger, &w.store, &mut w.submitter)
        .await
        .unwrap();

    assert_eq!(ledger.commission_pool_wei, U256::from(300));
    assert_eq!(ledger.active_listings.len(), 1);
    let listing = ledger.active_listings[0].clone();
    assert_eq!(listing.expected_proceeds_wei, U256::from(1_300));
    assert_eq!(
        outcome,
        PurchaseOutcome::Listed {
            order_hash: listing.order_hash,
            expected_proceeds: U256::from(1_300),
        }
    );
    // The whole flow hit the chain in order: buy, conduit approval,
    // on-chain validation.
    assert_eq!(w.chain.labels(), vec!["purchase", "approval", "validate"]);
    // The published order hashes to the same id we recorded.
    assert_eq!(
        w.marketplace.published(),
        vec![(listing.order_hash, U256::from(1_300))]
    );

    // --- Not sold yet: reconciler leaves everything alone ----------------
    let summary = w.reconciler.reconcile(&mut ledger, &w.store).await.unwrap();
    assert_eq!(summary.sold, 0);
    assert_eq!(ledger.active_listings.len(), 1);

    // --- The listing sells: ownership moves away from the treasury -------
    w.chain.set_owner(COLLECTION, U256::from(TOKEN_ID), BUYER);
    let summary = w.reconciler.reconcile(&mut ledger, &w.store).await.unwrap();
    assert_eq!(summary.sold, 1);
    assert_eq!(summary.proceeds, U256::from(1_300));
    assert_eq!(ledger.sale_pool_wei, U256::from(1_300));
    assert!(ledger.active_listings.is_empty());

    // --- Buyback the whole pool and burn ---------------------------------
    w.chain.set_swap_credit(900);
    let outcome = w
        .buyback
        .run(&mut ledger, &w.store, &mut w.submitter)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BuybackOutcome::Burned {
            amount: U256::from(900),
            cost: U256::from(1_300),
        }
    );
    assert_eq!(ledger.sale_pool_wei, U256::ZERO);
    assert!(!ledger.has_pending_burn());
    // The bought tokens left the treasury.
    assert_eq!(w.chain.erc20_balance_of(w.treasury), U256::ZERO);

    // --- Everything above is durable -------------------------------------
    let reloaded = w.store.load().await.unwrap().unwrap();
    assert_eq!(reloaded, ledger);
}

#[tokio::test]
async fn test_burn_failure_resumes_without_reswapping() {
    let mut w = world().await;

    let mut ledger = Ledger::new(0);
    ledger.credit_sale(U256::from(1_300));
    w.store.save(&ledger).await.unwrap();

    // Swap succeeds, burn is rejected: the pending burn must be durable.
    w.chain.set_swap_credit(900);
    w.chain.fail_submissions_labeled("burn");
    assert!(w
        .buyback
        .run(&mut ledger, &w.store, &mut w.submitter)
        .await
        .is_err());
    assert_eq!(ledger.pending_burn_amount, U256::from(900));
    assert_eq!(ledger.pending_burn_cost_wei, U256::from(1_300));
    assert_eq!(ledger.sale_pool_wei, U256::from(1_300));

    // "Restart": reload the ledger from disk and run the engine again.
    w.chain.clear_submission_failure();
    let mut ledger = storage::restore(&w.store, "/nonexistent/legacy.json", 0)
        .await
        .unwrap();
    assert!(ledger.has_pending_burn());

    let outcome = w
        .buyback
        .run(&mut ledger, &w.store, &mut w.submitter)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BuybackOutcome::Burned {
            amount: U256::from(900),
            cost: U256::from(1_300),
        }
    );
    assert_eq!(ledger.sale_pool_wei, U256::ZERO);

    // Exactly one swap across both runs: the resume went straight to burn.
    let swaps = w
        .chain
        .labels()
        .iter()
        .filter(|label| **label == "swap")
        .count();
    assert_eq!(swaps, 1);
}

#[tokio::test]
async fn test_chain_outage_leaves_persisted_state_intact() {
    let mut w = world().await;

    let mut ledger = Ledger::new(9);
    ledger.credit_commission(U256::from(1_000));
    w.store.save(&ledger).await.unwrap();
    let before = ledger.clone();

    w.chain.set_head(20);
    w.chain.set_error("connection refused");

    assert!(w.tax.collect(&mut ledger, &w.store).await.is_err());
    assert!(w
        .reconciler
        .reconcile(&mut ledger, &w.store)
        .await
        .is_ok()); // nothing listed, nothing to read
    assert_eq!(ledger, before);
    assert_eq!(w.store.load().await.unwrap().unwrap(), before);

    // The next tick recovers.
    w.chain.clear_error();
    w.chain.push_event(1, 50, 16);
    w.tax.collect(&mut ledger, &w.store).await.unwrap();
    assert_eq!(ledger.commission_pool_wei, U256::from(1_050));
    assert_eq!(ledger.last_tax_block, 20);
}
