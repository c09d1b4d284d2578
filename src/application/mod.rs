//! Application layer containing the ledger orchestration.
//!
//! This module defines the `PaymentLedger`, the single entry point for payments
//! and refunds, together with the idempotency registry, per-account commit
//! locks, and the processor registry it composes.

pub mod commit_lock;
pub mod history;
pub mod idempotency;
pub mod ledger;
pub mod processors;
