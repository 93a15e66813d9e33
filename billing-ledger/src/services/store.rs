//! Persistence seam for the billing ledger.
//!
//! Writers pass entities carrying the `version` they were read at. A store
//! commits only if the stored version still matches, bumps it by one, and
//! otherwise fails with `AppError::ConcurrencyConflict` without writing
//! anything. Every commit that moves money also carries the party balance
//! delta so the projection changes in the same atomic step.

use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::engine::BalanceCheck;
use crate::models::{Business, InventoryItem, Invoice, Party, Payment, StockAdjustment};

/// Change to one party's projected balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub party_id: Uuid,
    pub amount: Decimal,
}

impl BalanceDelta {
    pub fn new(party_id: Uuid, amount: Decimal) -> Self {
        Self { party_id, amount }
    }
}

/// Payment and the invoice it touched, as committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCommit {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_business(&self, business: &Business) -> Result<(), AppError>;
    async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError>;

    /// Inserts the party and seeds its projection with the opening balance.
    async fn insert_party(&self, party: &Party) -> Result<(), AppError>;
    async fn get_party(&self, business_id: Uuid, party_id: Uuid) -> Result<Option<Party>, AppError>;
    async fn list_parties(&self, business_id: Uuid) -> Result<Vec<Party>, AppError>;

    async fn insert_item(&self, item: &InventoryItem) -> Result<(), AppError>;
    async fn get_item(&self, business_id: Uuid, item_id: Uuid)
        -> Result<Option<InventoryItem>, AppError>;
    async fn list_items(&self, business_id: Uuid) -> Result<Vec<InventoryItem>, AppError>;

    /// Persist the adjusted item and append its audit record together.
    async fn commit_stock_adjustment(
        &self,
        item: &InventoryItem,
        adjustment: &StockAdjustment,
    ) -> Result<InventoryItem, AppError>;
    async fn get_stock_adjustment(
        &self,
        business_id: Uuid,
        adjustment_id: Uuid,
    ) -> Result<Option<StockAdjustment>, AppError>;
    /// Oldest first.
    async fn list_stock_adjustments(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<StockAdjustment>, AppError>;

    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        delta: BalanceDelta,
    ) -> Result<Invoice, AppError>;
    /// Update header fields; lines are rewritten when `replace_lines` is set.
    async fn update_invoice(
        &self,
        invoice: &Invoice,
        replace_lines: bool,
        delta: BalanceDelta,
    ) -> Result<Invoice, AppError>;
    /// Invoice with its lines.
    async fn get_invoice(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;
    async fn list_party_invoices(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Insert a new payment and, if present, update its invoice.
    async fn commit_payment(
        &self,
        payment: &Payment,
        invoice: Option<&Invoice>,
        delta: BalanceDelta,
    ) -> Result<PaymentCommit, AppError>;
    /// Update an existing payment (void) and, if present, its invoice.
    async fn commit_void(
        &self,
        payment: &Payment,
        invoice: Option<&Invoice>,
        delta: BalanceDelta,
    ) -> Result<PaymentCommit, AppError>;
    async fn get_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError>;
    async fn list_party_payments(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Vec<Payment>, AppError>;

    async fn get_projected_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Option<Decimal>, AppError>;
    /// Compare the projection with a recomputation from the party's
    /// documents and, with `repair`, rewrite a drifted projection. Balance
    /// commits for the party are held off until this returns. `None` when the
    /// party or its projection does not exist.
    async fn reconcile_party_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
        repair: bool,
    ) -> Result<Option<BalanceCheck>, AppError>;
    /// Overwrite the projection as-is, without reconciling.
    async fn set_projected_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
        balance: Decimal,
    ) -> Result<(), AppError>;
}

pub(crate) fn stale(entity: &str, id: Uuid, expected: i64) -> AppError {
    AppError::ConcurrencyConflict(anyhow::anyhow!(
        "{} {} was modified concurrently (expected version {})",
        entity,
        id,
        expected
    ))
}
