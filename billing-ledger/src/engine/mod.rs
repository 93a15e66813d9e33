//! Pure ledger rules. Nothing in here touches storage or locks.

pub mod money;
pub mod party_ledger;
pub mod reconciler;
pub mod stock;
pub mod tax;
pub mod totals;

pub use party_ledger::{
    BalanceCheck, BalanceDirection, PartyBalance, PartyLedger, PartyStatement, StatementDocument,
    StatementLine,
};
pub use reconciler::{Applied, PaymentReconciler, Voided};
pub use stock::StockLedger;
pub use money::{check_money, check_quantity, check_rate, round_money, MAX_MONEY, MAX_QUANTITY};
pub use tax::{same_jurisdiction, TaxSplit, TaxSplitter, STANDARD_SLABS};
pub use totals::{InvoiceTotalCalculator, InvoiceTotals, LineInput, LineTotals, TaxBreakdown};
