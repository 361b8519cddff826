//! Concord's double-entry economic engine.
//!
//! Every mutating operation lives behind one of the component modules
//! below; nothing outside this crate touches `ledger_entries` or
//! `treasury_state` directly. See each module for its own contract.

pub mod audit;
pub mod balance;
pub mod checkout;
pub mod compliance_hooks;
pub mod config;
pub mod db;
pub mod emergent;
pub mod error;
pub mod fee_split;
pub mod fees;
pub mod ledger;
pub mod metadata;
pub mod purchase;
pub mod reconcile;
pub mod royalty;
pub mod transfer;
pub mod treasury;
pub mod vault;
pub mod withdrawal;

pub use config::Config;
pub use error::{CoreError, CoreResult};
