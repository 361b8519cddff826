pub mod balance;
pub mod checkout;
pub mod emergent;
pub mod health;
pub mod ledger;
pub mod purchase;
pub mod reconcile;
pub mod transfer;
pub mod treasury;
pub mod vault;
pub mod withdrawal;
