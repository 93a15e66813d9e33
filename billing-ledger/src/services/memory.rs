//! In-process `LedgerStore`.
//!
//! All state sits behind one `RwLock`. Each commit validates versions and
//! computes the new projection before it mutates anything, then writes while
//! holding the write guard, so a rejected commit leaves no trace and readers
//! never see half of one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::store::{stale, BalanceDelta, LedgerStore, PaymentCommit};
use crate::engine::{BalanceCheck, PartyLedger, MAX_MONEY};
use crate::models::{Business, InventoryItem, Invoice, Party, Payment, StockAdjustment};

#[derive(Default)]
struct State {
    businesses: HashMap<Uuid, Business>,
    parties: HashMap<Uuid, Party>,
    items: HashMap<Uuid, InventoryItem>,
    adjustments: Vec<StockAdjustment>,
    invoices: HashMap<Uuid, Invoice>,
    payments: HashMap<Uuid, Payment>,
    balances: HashMap<Uuid, Decimal>,
}

impl State {
    /// Projection after `delta`, computed before anything is written.
    fn next_balance(&self, delta: BalanceDelta) -> Result<(Uuid, Decimal), AppError> {
        let current = self.balances.get(&delta.party_id).copied().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "balance projection for party {} not found",
                delta.party_id
            ))
        })?;
        let next = current
            .checked_add(delta.amount)
            .filter(|balance| balance.abs() <= MAX_MONEY)
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "balance of party {} would leave the supported range",
                    delta.party_id
                ))
            })?;
        Ok((delta.party_id, next))
    }

    fn party_invoices(&self, business_id: Uuid, party_id: Uuid) -> Vec<Invoice> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .values()
            .filter(|i| i.business_id == business_id && i.party_id == party_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| (i.invoice_date, i.created_utc));
        invoices
    }

    fn party_payments(&self, business_id: Uuid, party_id: Uuid) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.business_id == business_id && p.party_id == party_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.payment_date, p.created_utc));
        payments
    }

    fn check_invoice_version(&self, invoice: &Invoice) -> Result<(), AppError> {
        match self.invoices.get(&invoice.invoice_id) {
            Some(stored) if stored.business_id == invoice.business_id => {
                if stored.version == invoice.version {
                    Ok(())
                } else {
                    Err(stale("invoice", invoice.invoice_id, invoice.version))
                }
            }
            _ => Err(AppError::NotFound(anyhow::anyhow!(
                "invoice {} not found",
                invoice.invoice_id
            ))),
        }
    }

    fn write_invoice(&mut self, invoice: &Invoice, replace_lines: bool) -> Invoice {
        let mut next = invoice.clone();
        next.version += 1;
        next.updated_utc = Utc::now();
        if !replace_lines {
            if let Some(stored) = self.invoices.get(&invoice.invoice_id) {
                next.lines = stored.lines.clone();
            }
        }
        self.invoices.insert(next.invoice_id, next.clone());
        next
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned<T: Clone>(value: Option<&T>, business_id: Uuid, owner: impl Fn(&T) -> Uuid) -> Option<T> {
    value.filter(|v| owner(*v) == business_id).cloned()
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_business(&self, business: &Business) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.businesses.insert(business.business_id, business.clone());
        Ok(())
    }

    async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError> {
        Ok(self.state.read().await.businesses.get(&business_id).cloned())
    }

    async fn insert_party(&self, party: &Party) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.parties.insert(party.party_id, party.clone());
        state
            .balances
            .insert(party.party_id, party.signed_opening_balance());
        Ok(())
    }

    async fn get_party(&self, business_id: Uuid, party_id: Uuid) -> Result<Option<Party>, AppError> {
        let state = self.state.read().await;
        Ok(owned(state.parties.get(&party_id), business_id, |p| p.business_id))
    }

    async fn list_parties(&self, business_id: Uuid) -> Result<Vec<Party>, AppError> {
        let state = self.state.read().await;
        let mut parties: Vec<Party> = state
            .parties
            .values()
            .filter(|p| p.business_id == business_id)
            .cloned()
            .collect();
        parties.sort_by_key(|p| p.created_utc);
        Ok(parties)
    }

    async fn insert_item(&self, item: &InventoryItem) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.items.insert(item.item_id, item.clone());
        Ok(())
    }

    async fn get_item(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<InventoryItem>, AppError> {
        let state = self.state.read().await;
        Ok(owned(state.items.get(&item_id), business_id, |i| i.business_id))
    }

    async fn list_items(&self, business_id: Uuid) -> Result<Vec<InventoryItem>, AppError> {
        let state = self.state.read().await;
        let mut items: Vec<InventoryItem> = state
            .items
            .values()
            .filter(|i| i.business_id == business_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    #[instrument(skip(self, item, adjustment), fields(item_id = %item.item_id))]
    async fn commit_stock_adjustment(
        &self,
        item: &InventoryItem,
        adjustment: &StockAdjustment,
    ) -> Result<InventoryItem, AppError> {
        let mut state = self.state.write().await;

        let stored = owned(state.items.get(&item.item_id), item.business_id, |i| i.business_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("item {} not found", item.item_id)))?;
        if stored.version != item.version {
            return Err(stale("item", item.item_id, item.version));
        }

        let mut next = item.clone();
        next.version += 1;
        next.updated_utc = adjustment.created_utc;
        state.items.insert(next.item_id, next.clone());
        state.adjustments.push(adjustment.clone());

        debug!(version = next.version, "Stock adjustment committed");
        Ok(next)
    }

    async fn get_stock_adjustment(
        &self,
        business_id: Uuid,
        adjustment_id: Uuid,
    ) -> Result<Option<StockAdjustment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .adjustments
            .iter()
            .find(|a| a.adjustment_id == adjustment_id && a.business_id == business_id)
            .cloned())
    }

    async fn list_stock_adjustments(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<StockAdjustment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .adjustments
            .iter()
            .filter(|a| a.item_id == item_id && a.business_id == business_id)
            .cloned()
            .collect())
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id))]
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        delta: BalanceDelta,
    ) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        let (party_id, balance) = state.next_balance(delta)?;

        state.invoices.insert(invoice.invoice_id, invoice.clone());
        state.balances.insert(party_id, balance);
        Ok(invoice.clone())
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id))]
    async fn update_invoice(
        &self,
        invoice: &Invoice,
        replace_lines: bool,
        delta: BalanceDelta,
    ) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        state.check_invoice_version(invoice)?;
        let (party_id, balance) = state.next_balance(delta)?;

        let next = state.write_invoice(invoice, replace_lines);
        state.balances.insert(party_id, balance);
        Ok(next)
    }

    async fn get_invoice(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let state = self.state.read().await;
        Ok(owned(state.invoices.get(&invoice_id), business_id, |i| i.business_id))
    }

    async fn list_party_invoices(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        Ok(self.state.read().await.party_invoices(business_id, party_id))
    }

    #[instrument(skip(self, payment, invoice), fields(payment_id = %payment.payment_id))]
    async fn commit_payment(
        &self,
        payment: &Payment,
        invoice: Option<&Invoice>,
        delta: BalanceDelta,
    ) -> Result<PaymentCommit, AppError> {
        let mut state = self.state.write().await;
        if let Some(invoice) = invoice {
            state.check_invoice_version(invoice)?;
        }
        let (party_id, balance) = state.next_balance(delta)?;

        let invoice = invoice.map(|inv| state.write_invoice(inv, false));
        state.payments.insert(payment.payment_id, payment.clone());
        state.balances.insert(party_id, balance);

        Ok(PaymentCommit {
            payment: payment.clone(),
            invoice,
        })
    }

    #[instrument(skip(self, payment, invoice), fields(payment_id = %payment.payment_id))]
    async fn commit_void(
        &self,
        payment: &Payment,
        invoice: Option<&Invoice>,
        delta: BalanceDelta,
    ) -> Result<PaymentCommit, AppError> {
        let mut state = self.state.write().await;

        let stored = owned(
            state.payments.get(&payment.payment_id),
            payment.business_id,
            |p| p.business_id,
        )
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("payment {} not found", payment.payment_id))
        })?;
        if stored.version != payment.version {
            return Err(stale("payment", payment.payment_id, payment.version));
        }
        if let Some(invoice) = invoice {
            state.check_invoice_version(invoice)?;
        }
        let (party_id, balance) = state.next_balance(delta)?;

        let invoice = invoice.map(|inv| state.write_invoice(inv, false));
        let mut next = payment.clone();
        next.version += 1;
        state.payments.insert(next.payment_id, next.clone());
        state.balances.insert(party_id, balance);

        Ok(PaymentCommit {
            payment: next,
            invoice,
        })
    }

    async fn get_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let state = self.state.read().await;
        Ok(owned(state.payments.get(&payment_id), business_id, |p| p.business_id))
    }

    async fn list_party_payments(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        Ok(self.state.read().await.party_payments(business_id, party_id))
    }

    async fn get_projected_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Option<Decimal>, AppError> {
        let state = self.state.read().await;
        let owned_party = state
            .parties
            .get(&party_id)
            .is_some_and(|p| p.business_id == business_id);
        Ok(owned_party
            .then(|| state.balances.get(&party_id).copied())
            .flatten())
    }

    #[instrument(skip(self))]
    async fn reconcile_party_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
        repair: bool,
    ) -> Result<Option<BalanceCheck>, AppError> {
        let mut state = self.state.write().await;
        let Some(party) = owned(state.parties.get(&party_id), business_id, |p| p.business_id)
        else {
            return Ok(None);
        };
        let Some(projected) = state.balances.get(&party_id).copied() else {
            return Ok(None);
        };

        let invoices = state.party_invoices(business_id, party_id);
        let payments = state.party_payments(business_id, party_id);
        let check = PartyLedger::verify(&party, projected, &invoices, &payments);
        if repair && !check.is_consistent() {
            state.balances.insert(party_id, check.recomputed);
            debug!(balance = %check.recomputed, "Projection rewritten");
        }
        Ok(Some(check))
    }

    async fn set_projected_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
        balance: Decimal,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if !state
            .parties
            .get(&party_id)
            .is_some_and(|p| p.business_id == business_id)
        {
            return Err(AppError::NotFound(anyhow::anyhow!("party {} not found", party_id)));
        }
        state.balances.insert(party_id, balance);
        Ok(())
    }
}
