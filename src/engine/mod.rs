//! Core engine — the four tick-driven treasury services.
//!
//! Each service consumes the chain boundary (and the submitter for writes),
//! mutates the ledger, and persists at its defined safe boundary. The loop
//! driver in `main` sequences them: tax collection → listing reconciliation
//! → at most one of buyback-burn / purchase-and-list.

pub mod buyback;
pub mod purchase;
pub mod reconciler;
pub mod tax;
