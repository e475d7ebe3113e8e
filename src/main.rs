//! FLYWHEEL — Autonomous NFT Treasury Agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger from the durable store (or migrates/creates it),
//! and runs the tax → reconcile → trade loop with graceful shutdown.

use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use flywheel::chain::rpc::HttpChainClient;
use flywheel::chain::submitter::TransactionSubmitter;
use flywheel::chain::ChainClient;
use flywheel::config::{self, AppConfig};
use flywheel::engine::buyback::BuybackBurnEngine;
use flywheel::engine::purchase::{PurchaseConfig, PurchaseOrchestrator};
use flywheel::engine::reconciler::ListingReconciler;
use flywheel::engine::tax::TaxCollector;
use flywheel::exchange::hash::OrderHasher;
use flywheel::marketplace::client::AggregatorClient;
use flywheel::storage::{self, LedgerStore};
use flywheel::types::{is_fatal, Ledger};

const BANNER: &str = r#"
  _____ _  __   ____        ___   _ _____ _____ _
 |  ___| | \ \ / /\ \      / / | | | ____| ____| |
 | |_  | |  \ V /  \ \ /\ / /| |_| |  _| |  _| | |
 |  _| | |___| |    \ V  V / |  _  | |___| |___| |___
 |_|   |_____|_|     \_/\_/  |_| |_|_____|_____|_____|

  Tax -> Acquire -> Relist -> Burn : the treasury flywheel
  v0.1.0 — Autonomous Agent
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging(&cfg);

    // Print startup banner
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        loop_interval_secs = cfg.agent.loop_interval_secs,
        chain_id = cfg.chain.chain_id,
        "FLYWHEEL starting up"
    );

    // -- Signer and chain transport --------------------------------------

    let signer: PrivateKeySigner = cfg
        .chain
        .private_key()?
        .expose_secret()
        .parse()
        .context("Invalid signer private key")?;
    let treasury = signer.address();
    info!(treasury = %treasury, "Treasury signer loaded");

    let chain: Arc<dyn ChainClient> = Arc::new(HttpChainClient::new(
        cfg.chain.rpc_url()?,
        cfg.chain.chain_id,
        signer.clone(),
    )?);

    // -- Restore or create the ledger ------------------------------------

    let store = LedgerStore::open(&cfg.storage.db_path).await?;
    // First runs start scanning at the current head rather than genesis.
    let initial_block = chain.head_block().await.context("Failed to reach RPC endpoint")?;
    let mut ledger = storage::restore(&store, &cfg.storage.legacy_snapshot, initial_block).await?;
    info!(%ledger, "Ledger ready");

    // -- Initialise components -------------------------------------------

    let token = config::parse_address(&cfg.token.address, "token.address")?;
    let mut submitter = TransactionSubmitter::new(chain.clone(), treasury);

    let tax = cfg.tax.enabled.then(|| {
        TaxCollector::new(
            chain.clone(),
            token,
            treasury,
            cfg.tax.max_block_span,
            Duration::from_millis(cfg.tax.throttle_ms),
        )
    });
    if tax.is_none() {
        warn!("Tax monitoring disabled — the commission pool will not grow");
    }

    let reconciler =
        ListingReconciler::new(chain.clone(), treasury, cfg.listings.max_checked_per_tick);

    let buyback = BuybackBurnEngine::new(chain.clone(), token, treasury, cfg.buyback.chunk()?);

    let purchase = match cfg.acquisition.target()? {
        Some(target) => {
            let marketplace = Arc::new(AggregatorClient::new(
                cfg.marketplace.api_url.clone(),
                cfg.marketplace.api_key()?,
                cfg.chain.chain_id,
            )?);
            let exchange = config::parse_address(&cfg.acquisition.exchange, "acquisition.exchange")?;
            info!(target = %target, exchange = %exchange, "Acquisition target configured");
            Some(PurchaseOrchestrator::new(
                chain.clone(),
                marketplace,
                OrderHasher::new(cfg.chain.chain_id, exchange),
                signer,
                treasury,
                PurchaseConfig {
                    target,
                    exchange,
                    conduit: config::parse_address(
                        &cfg.acquisition.conduit,
                        "acquisition.conduit",
                    )?,
                    markup_bps: cfg.acquisition.markup_bps,
                    relist_duration: Duration::from_secs(cfg.acquisition.relist_duration_secs),
                },
            ))
        }
        None => {
            warn!("No acquisition target configured — running collect/reconcile/burn only");
            None
        }
    };

    // -- Main loop -------------------------------------------------------

    let cooldown = Duration::from_secs(cfg.agent.cooldown_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.loop_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.loop_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = run_tick(
                    tax.as_ref(),
                    &reconciler,
                    &buyback,
                    purchase.as_ref(),
                    &mut ledger,
                    &store,
                    &mut submitter,
                    cooldown,
                ).await {
                    // run_tick only propagates fatal errors.
                    error!(error = format!("{err:#}"), "Fatal error — shutting down");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(%ledger, "FLYWHEEL shut down cleanly.");
    Ok(())
}

/// Run one tick: tax collection → listing reconciliation → at most one of
/// buyback-burn / purchase-and-list. Each step is error-isolated; only
/// fatal (persistence/config) errors escape.
#[allow(clippy::too_many_arguments)]
async fn run_tick(
    tax: Option<&TaxCollector>,
    reconciler: &ListingReconciler,
    buyback: &BuybackBurnEngine,
    purchase: Option<&PurchaseOrchestrator>,
    ledger: &mut Ledger,
    store: &LedgerStore,
    submitter: &mut TransactionSubmitter,
    cooldown: Duration,
) -> Result<()> {
    // 1. Collect transfer-tax proceeds.
    if let Some(tax) = tax {
        match tax.collect(ledger, store).await {
            Ok(summary) => {
                if summary.events > 0 {
                    pause(cooldown).await;
                }
            }
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => error!(error = format!("{err:#}"), "Tax collection failed"),
        }
    }

    // 2. Reconcile active listings against chain state.
    match reconciler.reconcile(ledger, store).await {
        Ok(summary) => {
            if summary.sold > 0 {
                pause(cooldown).await;
            }
        }
        Err(err) if is_fatal(&err) => return Err(err),
        Err(err) => error!(error = format!("{err:#}"), "Listing reconciliation failed"),
    }

    // 3. Trade: buyback takes priority over a new purchase; never both in
    //    the same tick.
    if buyback.has_work(ledger) {
        match buyback.run(ledger, store, submitter).await {
            Ok(outcome) => {
                info!(?outcome, "Buyback step complete");
                pause(cooldown).await;
            }
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => error!(error = format!("{err:#}"), "Buyback-burn failed"),
        }
    } else if let Some(purchase) = purchase {
        match purchase.run(ledger, store, submitter).await {
            Ok(outcome) => {
                if outcome != flywheel::engine::purchase::PurchaseOutcome::Idle {
                    info!(?outcome, "Purchase step complete");
                    pause(cooldown).await;
                }
            }
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => error!(error = format!("{err:#}"), "Purchase failed"),
        }
    }

    Ok(())
}

async fn pause(cooldown: Duration) {
    if !cooldown.is_zero() {
        tokio::time::sleep(cooldown).await;
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flywheel=info"));

    let json_logging = std::env::var("FLYWHEEL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
