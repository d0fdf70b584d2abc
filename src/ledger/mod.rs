//! Resource ledger
//!
//! Components:
//! - book: accounts, platform pool, supply journal and the non-negative
//!   credit/debit/transfer operations
//! - policy: UBI issuance, inflation tax and wealth cap

pub mod book;
pub mod policy;

pub use book::{Balances, Ledger, LedgerError, SupplyJournal, SupplySnapshot};
pub use policy::{apply_inflation_tax, enforce_wealth_cap, issue_ubi, PolicyOutcome};
