//! Domain types and the ports the ledger depends on.

pub mod account;
pub mod payment;
pub mod ports;
pub mod processor;
