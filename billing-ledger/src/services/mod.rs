pub mod billing;
pub mod database;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod store;

pub use billing::{BillingService, StockAdjusted};
pub use database::Database;
pub use locks::KeyedLocks;
pub use memory::MemoryStore;
pub use store::{BalanceDelta, LedgerStore, PaymentCommit};
