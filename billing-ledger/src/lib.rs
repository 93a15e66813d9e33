//! Billing Ledger - GST tax split, party balances, payment reconciliation
//! and stock for multi-tenant small-business billing.

pub mod config;
pub mod engine;
pub mod models;
pub mod services;

pub use services::{BillingService, Database, LedgerStore, MemoryStore};
