//! Inbound operations of the billing ledger.
//!
//! `BillingService` resolves tenant-scoped entities, runs the pure engine
//! rules and hands the result to the store as one commit. Mutations on the
//! same item, invoice or payment are serialized by a keyed lock, and a
//! version conflict from the store is retried with backoff.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use service_core::retry::{retry_on_conflict, RetryConfig};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::locks::KeyedLocks;
use super::metrics::{
    BALANCE_DRIFT_TOTAL, ERRORS_TOTAL, INVOICES_TOTAL, PAYMENTS_TOTAL, STOCK_ADJUSTMENTS_TOTAL,
};
use super::store::{BalanceDelta, LedgerStore, PaymentCommit};
use crate::config::LedgerSettings;
use crate::engine::{
    check_money, check_quantity, check_rate, BalanceCheck, InvoiceTotalCalculator, InvoiceTotals,
    LineInput, PartyBalance, PartyLedger, PartyStatement, PaymentReconciler, StockLedger,
    TaxSplitter,
};
use crate::models::{
    AdjustStock, AdjustmentReason, Business, CreateBusiness, CreateInvoice, CreateInvoiceLine,
    CreateItem, CreateParty, InventoryItem, Invoice, InvoiceLine, InvoiceStatus, ItemKind, Party,
    Payment, PaymentStatus, RecordPayment, StockAdjustment, StockStatus,
};

const MAX_ITEM_TAX_RATE: Decimal = dec!(28);

/// Item after a committed stock movement, with the audit record written.
#[derive(Debug, Clone, PartialEq)]
pub struct StockAdjusted {
    pub item: InventoryItem,
    pub adjustment: StockAdjustment,
}

impl StockAdjusted {
    pub fn status(&self) -> StockStatus {
        self.item.stock_status()
    }
}

fn not_found(kind: &str, id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", kind, id))
}

fn normalize_state(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn record_error(operation: &str, err: &AppError) {
    ERRORS_TOTAL
        .with_label_values(&[operation, err.kind()])
        .inc();
    if err.is_user_facing() {
        info!(operation, error = %err, "Request rejected");
    } else {
        warn!(operation, error = %err, "Request failed");
    }
}

#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn LedgerStore>,
    calculator: InvoiceTotalCalculator,
    locks: KeyedLocks,
    retry: RetryConfig,
}

impl BillingService {
    pub fn new(store: Arc<dyn LedgerStore>, settings: LedgerSettings) -> Self {
        Self {
            store,
            calculator: InvoiceTotalCalculator::new(TaxSplitter::with_slabs(settings.gst_slabs)),
            locks: KeyedLocks::new(),
            retry: settings.conflict_retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    async fn business(&self, business_id: Uuid) -> Result<Business, AppError> {
        self.store
            .get_business(business_id)
            .await?
            .ok_or_else(|| not_found("business", business_id))
    }

    async fn party(&self, business_id: Uuid, party_id: Uuid) -> Result<Party, AppError> {
        self.store
            .get_party(business_id, party_id)
            .await?
            .ok_or_else(|| not_found("party", party_id))
    }

    async fn item(&self, business_id: Uuid, item_id: Uuid) -> Result<InventoryItem, AppError> {
        self.store
            .get_item(business_id, item_id)
            .await?
            .ok_or_else(|| not_found("item", item_id))
    }

    pub async fn get_invoice(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(business_id, invoice_id)
            .await?
            .ok_or_else(|| not_found("invoice", invoice_id))
    }

    pub async fn get_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Payment, AppError> {
        self.store
            .get_payment(business_id, payment_id)
            .await?
            .ok_or_else(|| not_found("payment", payment_id))
    }

    // -------------------------------------------------------------------------
    // Onboarding
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_business(&self, input: CreateBusiness) -> Result<Business, AppError> {
        input.validate()?;
        check_rate("default tax rate", input.default_tax_rate, dec!(100))?;

        let business = Business {
            business_id: Uuid::new_v4(),
            name: input.name,
            state_code: normalize_state(&input.state_code),
            default_tax_rate: input.default_tax_rate,
            created_utc: Utc::now(),
        };
        self.store.insert_business(&business).await?;

        info!(business_id = %business.business_id, "Business created");
        Ok(business)
    }

    #[instrument(skip(self, input), fields(business_id = %business_id))]
    pub async fn create_party(
        &self,
        business_id: Uuid,
        input: CreateParty,
    ) -> Result<Party, AppError> {
        input.validate()?;
        if input.opening_balance < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "opening balance must not be negative; use the balance type for direction"
            )));
        }
        check_money("opening balance", input.opening_balance)?;
        self.business(business_id).await?;

        let party = Party {
            party_id: Uuid::new_v4(),
            business_id,
            name: input.name,
            party_type: input.party_type,
            state_code: input
                .state_code
                .as_deref()
                .map(normalize_state)
                .filter(|s| !s.is_empty()),
            opening_balance: input.opening_balance,
            opening_balance_type: input.opening_balance_type,
            created_utc: Utc::now(),
        };
        self.store.insert_party(&party).await?;

        info!(
            party_id = %party.party_id,
            party_type = party.party_type.as_str(),
            "Party created"
        );
        Ok(party)
    }

    #[instrument(skip(self, input), fields(business_id = %business_id))]
    pub async fn create_item(
        &self,
        business_id: Uuid,
        input: CreateItem,
    ) -> Result<InventoryItem, AppError> {
        input.validate()?;
        check_rate("item tax rate", input.tax_rate, MAX_ITEM_TAX_RATE)?;
        if input.purchase_price < Decimal::ZERO || input.selling_price < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "prices must not be negative"
            )));
        }
        check_money("purchase price", input.purchase_price)?;
        check_money("selling price", input.selling_price)?;
        if input.low_stock_threshold < Decimal::ZERO || input.opening_quantity < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "opening quantity and low stock threshold must not be negative"
            )));
        }
        check_quantity("opening quantity", input.opening_quantity)?;
        check_quantity("low stock threshold", input.low_stock_threshold)?;
        if input.item_kind == ItemKind::Service && !input.opening_quantity.is_zero() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "service items do not carry stock"
            )));
        }
        self.business(business_id).await?;

        let now = Utc::now();
        let item = InventoryItem {
            item_id: Uuid::new_v4(),
            business_id,
            name: input.name,
            item_kind: input.item_kind,
            unit: input.unit,
            purchase_price: input.purchase_price,
            selling_price: input.selling_price,
            tax_rate: input.tax_rate,
            quantity: input.opening_quantity,
            low_stock_threshold: input.low_stock_threshold,
            version: 1,
            created_utc: now,
            updated_utc: now,
        };
        self.store.insert_item(&item).await?;

        info!(item_id = %item.item_id, kind = item.item_kind.as_str(), "Item created");
        Ok(item)
    }

    // -------------------------------------------------------------------------
    // Stock
    // -------------------------------------------------------------------------

    #[instrument(skip(self, request), fields(business_id = %business_id, item_id = %item_id, delta = %request.delta))]
    pub async fn adjust_stock(
        &self,
        business_id: Uuid,
        item_id: Uuid,
        request: AdjustStock,
    ) -> Result<StockAdjusted, AppError> {
        let result = self.adjust_stock_locked(business_id, item_id, &request, None).await;

        let status = if result.is_ok() { "ok" } else { "rejected" };
        STOCK_ADJUSTMENTS_TOTAL
            .with_label_values(&[request.reason.as_str(), status])
            .inc();
        result.inspect_err(|e| record_error("adjust_stock", e))
    }

    /// Post the opposite of an earlier adjustment. Each adjustment can be
    /// corrected once.
    #[instrument(skip(self), fields(business_id = %business_id, adjustment_id = %adjustment_id))]
    pub async fn correct_stock_adjustment(
        &self,
        business_id: Uuid,
        adjustment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<StockAdjusted, AppError> {
        let result: Result<StockAdjusted, AppError> = async {
            let original = self
                .store
                .get_stock_adjustment(business_id, adjustment_id)
                .await?
                .ok_or_else(|| not_found("stock adjustment", adjustment_id))?;

            let request = AdjustStock {
                delta: -original.delta,
                reason: AdjustmentReason::ManualCorrection,
                actor_id,
                allow_backorder: false,
            };
            self.adjust_stock_locked(business_id, original.item_id, &request, Some(adjustment_id))
                .await
        }
        .await;

        let status = if result.is_ok() { "ok" } else { "rejected" };
        STOCK_ADJUSTMENTS_TOTAL
            .with_label_values(&[AdjustmentReason::ManualCorrection.as_str(), status])
            .inc();
        result.inspect_err(|e| record_error("correct_stock_adjustment", e))
    }

    async fn adjust_stock_locked(
        &self,
        business_id: Uuid,
        item_id: Uuid,
        request: &AdjustStock,
        amends: Option<Uuid>,
    ) -> Result<StockAdjusted, AppError> {
        let _guard = self.locks.lock(item_id).await;
        let adjustment_id = Uuid::new_v4();

        retry_on_conflict(&self.retry, "adjust_stock", move || {
            self.try_adjust_stock(business_id, item_id, request, amends, adjustment_id)
        })
        .await
    }

    async fn try_adjust_stock(
        &self,
        business_id: Uuid,
        item_id: Uuid,
        request: &AdjustStock,
        amends: Option<Uuid>,
        adjustment_id: Uuid,
    ) -> Result<StockAdjusted, AppError> {
        let item = self.item(business_id, item_id).await?;

        if let Some(original) = amends {
            let already = self
                .store
                .list_stock_adjustments(business_id, item_id)
                .await?
                .iter()
                .any(|a| a.amends == Some(original));
            if already {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "stock adjustment {} has already been corrected",
                    original
                )));
            }
        }

        let updated = StockLedger::apply(&item, request)?;
        let adjustment = StockAdjustment {
            adjustment_id,
            business_id,
            item_id,
            delta: request.delta,
            reason: request.reason,
            actor_id: request.actor_id,
            allow_backorder: request.allow_backorder,
            amends,
            quantity_after: updated.quantity,
            created_utc: Utc::now(),
        };

        let item = self
            .store
            .commit_stock_adjustment(&updated, &adjustment)
            .await?;

        info!(
            quantity = %item.quantity,
            low_stock = item.is_low_stock(),
            reason = %adjustment.reason,
            "Stock adjusted"
        );
        Ok(StockAdjusted { item, adjustment })
    }

    pub async fn get_item_stock_status(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<StockStatus, AppError> {
        Ok(self.item(business_id, item_id).await?.stock_status())
    }

    pub async fn list_low_stock_items(&self, business_id: Uuid) -> Result<Vec<StockStatus>, AppError> {
        Ok(self
            .store
            .list_items(business_id)
            .await?
            .iter()
            .filter(|item| item.item_kind == ItemKind::Product && item.is_low_stock())
            .map(InventoryItem::stock_status)
            .collect())
    }

    pub async fn list_stock_adjustments(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<StockAdjustment>, AppError> {
        self.item(business_id, item_id).await?;
        self.store.list_stock_adjustments(business_id, item_id).await
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    /// Resolve rates and descriptions, then price the lines for `party`.
    async fn price_lines(
        &self,
        business: &Business,
        party: &Party,
        invoice_id: Uuid,
        inputs: &[CreateInvoiceLine],
    ) -> Result<(Vec<InvoiceLine>, InvoiceTotals, String), AppError> {
        let place_of_supply = party
            .state_code
            .clone()
            .unwrap_or_else(|| business.state_code.clone());

        let mut resolved = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let item = match input.item_id {
                Some(item_id) => Some(self.item(business.business_id, item_id).await?),
                None => None,
            };
            let tax_rate = input
                .tax_rate
                .or_else(|| item.as_ref().map(|i| i.tax_rate))
                .unwrap_or(business.default_tax_rate);
            let description = match (input.description.trim(), &item) {
                ("", Some(item)) => item.name.clone(),
                ("", None) => {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "line {}: description is required for free-text lines",
                        index + 1
                    )))
                }
                (text, _) => text.to_string(),
            };
            resolved.push((input, description, tax_rate));
        }

        let priced: Vec<LineInput> = resolved
            .iter()
            .map(|(input, _, tax_rate)| LineInput {
                quantity: input.quantity,
                unit_price: input.unit_price,
                tax_rate: *tax_rate,
            })
            .collect();
        let totals = self
            .calculator
            .compute(&priced, &business.state_code, &place_of_supply)?;

        let lines = resolved
            .into_iter()
            .zip(&totals.lines)
            .enumerate()
            .map(|(index, ((input, description, tax_rate), line))| InvoiceLine {
                line_id: Uuid::new_v4(),
                invoice_id,
                business_id: business.business_id,
                item_id: input.item_id,
                description,
                quantity: input.quantity,
                unit_price: input.unit_price,
                tax_rate,
                line_amount: line.line_amount,
                cgst: line.tax.cgst,
                sgst: line.tax.sgst,
                igst: line.tax.igst,
                tax_amount: line.tax_amount,
                non_standard_rate: line.tax.non_standard_rate,
                sort_order: index as i32,
            })
            .collect();

        Ok((lines, totals, place_of_supply))
    }

    #[instrument(skip(self, input), fields(business_id = %business_id, party_id = %input.party_id, invoice_type = input.invoice_type.as_str()))]
    pub async fn create_invoice(
        &self,
        business_id: Uuid,
        input: CreateInvoice,
    ) -> Result<Invoice, AppError> {
        let result: Result<Invoice, AppError> = async {
            let business = self.business(business_id).await?;
            let party = self.party(business_id, input.party_id).await?;
            if let Some(due) = input.due_date {
                if due < input.invoice_date {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "due date {} is before invoice date {}",
                        due,
                        input.invoice_date
                    )));
                }
            }

            let invoice_id = Uuid::new_v4();
            let (lines, totals, place_of_supply) = self
                .price_lines(&business, &party, invoice_id, &input.lines)
                .await?;

            let now = Utc::now();
            let invoice = Invoice {
                invoice_id,
                business_id,
                party_id: party.party_id,
                invoice_type: input.invoice_type,
                invoice_date: input.invoice_date,
                due_date: input.due_date,
                status: if input.draft {
                    InvoiceStatus::Draft
                } else {
                    InvoiceStatus::Pending
                },
                seller_state: business.state_code.clone(),
                place_of_supply,
                subtotal: totals.subtotal,
                cgst_total: totals.tax.cgst,
                sgst_total: totals.tax.sgst,
                igst_total: totals.tax.igst,
                tax_amount: totals.tax_amount,
                total: totals.total,
                paid_amount: Decimal::ZERO,
                notes: input.notes.clone(),
                version: 1,
                created_utc: now,
                updated_utc: now,
                lines,
            };

            let delta = BalanceDelta::new(party.party_id, PartyLedger::invoice_delta(None, &invoice));
            let invoice = self.store.insert_invoice(&invoice, delta).await?;

            INVOICES_TOTAL
                .with_label_values(&[invoice.invoice_type.as_str(), "create"])
                .inc();
            info!(
                invoice_id = %invoice.invoice_id,
                total = %invoice.total,
                status = %invoice.status,
                "Invoice created"
            );
            Ok(invoice)
        }
        .await;

        result.inspect_err(|e| record_error("create_invoice", e))
    }

    /// Run `change` against the current invoice under its lock, committing
    /// the result with the matching balance delta.
    async fn mutate_invoice<F>(
        &self,
        operation: &'static str,
        business_id: Uuid,
        invoice_id: Uuid,
        change: F,
    ) -> Result<Invoice, AppError>
    where
        F: Fn(&Invoice) -> Result<Option<(Invoice, bool)>, AppError> + Send + Sync,
    {
        let _guard = self.locks.lock(invoice_id).await;
        let change = &change;

        let result = retry_on_conflict(&self.retry, operation, move || async move {
            let current = self.get_invoice(business_id, invoice_id).await?;
            let Some((next, replace_lines)) = change(&current)? else {
                return Ok(current);
            };

            let delta = BalanceDelta::new(
                current.party_id,
                PartyLedger::invoice_delta(Some(&current), &next),
            );
            let stored = self.store.update_invoice(&next, replace_lines, delta).await?;

            INVOICES_TOTAL
                .with_label_values(&[stored.invoice_type.as_str(), operation])
                .inc();
            info!(status = %stored.status, total = %stored.total, "Invoice updated");
            Ok(stored)
        })
        .await;

        result.inspect_err(|e| record_error(operation, e))
    }

    /// Move a draft to pending so it can take payments.
    #[instrument(skip(self), fields(business_id = %business_id, invoice_id = %invoice_id))]
    pub async fn issue_invoice(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.mutate_invoice("issue", business_id, invoice_id, |current| {
            if current.status != InvoiceStatus::Draft {
                PaymentReconciler::issue(current)?;
                return Ok(None);
            }
            Ok(Some((PaymentReconciler::issue(current)?, false)))
        })
        .await
    }

    #[instrument(skip(self), fields(business_id = %business_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.mutate_invoice("cancel", business_id, invoice_id, |current| {
            if current.is_cancelled() {
                return Ok(None);
            }
            Ok(Some((PaymentReconciler::cancel(current)?, false)))
        })
        .await
    }

    /// Replace every line of a draft invoice and recompute its totals.
    #[instrument(skip(self, lines), fields(business_id = %business_id, invoice_id = %invoice_id, line_count = lines.len()))]
    pub async fn replace_draft_lines(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
        lines: Vec<CreateInvoiceLine>,
    ) -> Result<Invoice, AppError> {
        let result: Result<(Vec<InvoiceLine>, InvoiceTotals, String), AppError> = async {
            let current = self.get_invoice(business_id, invoice_id).await?;
            if current.status != InvoiceStatus::Draft {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "invoice {} is {}; only drafts can be edited",
                    invoice_id,
                    current.status
                )));
            }
            let business = self.business(business_id).await?;
            let party = self.party(business_id, current.party_id).await?;
            self.price_lines(&business, &party, invoice_id, &lines).await
        }
        .await
        .inspect_err(|e| record_error("edit", e));
        let (priced, totals, place_of_supply) = result?;

        self.mutate_invoice("edit", business_id, invoice_id, move |current| {
            if current.status != InvoiceStatus::Draft {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "invoice {} is {}; only drafts can be edited",
                    current.invoice_id,
                    current.status
                )));
            }
            Ok(Some((
                Invoice {
                    place_of_supply: place_of_supply.clone(),
                    subtotal: totals.subtotal,
                    cgst_total: totals.tax.cgst,
                    sgst_total: totals.tax.sgst,
                    igst_total: totals.tax.igst,
                    tax_amount: totals.tax_amount,
                    total: totals.total,
                    lines: priced.clone(),
                    ..current.clone()
                },
                true,
            )))
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self, request), fields(business_id = %business_id, party_id = %request.party_id, direction = %request.direction, amount = %request.amount))]
    pub async fn record_payment(
        &self,
        business_id: Uuid,
        request: RecordPayment,
    ) -> Result<PaymentCommit, AppError> {
        let result: Result<PaymentCommit, AppError> = async {
            if request.amount <= Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "payment amount must be greater than zero, got {}",
                    request.amount
                )));
            }
            check_money("payment amount", request.amount)?;
            self.party(business_id, request.party_id).await?;

            let payment_id = Uuid::new_v4();
            let _guard = self
                .locks
                .lock(request.invoice_id.unwrap_or(payment_id))
                .await;
            let request = &request;

            retry_on_conflict(&self.retry, "record_payment", move || {
                self.try_record_payment(business_id, payment_id, request)
            })
            .await
        }
        .await;

        result.inspect_err(|e| record_error("record_payment", e))
    }

    async fn try_record_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
        request: &RecordPayment,
    ) -> Result<PaymentCommit, AppError> {
        let invoice = match request.invoice_id {
            Some(invoice_id) => Some(self.get_invoice(business_id, invoice_id).await?),
            None => None,
        };

        let mut payment = Payment {
            payment_id,
            business_id,
            party_id: request.party_id,
            invoice_id: request.invoice_id,
            direction: request.direction,
            amount: request.amount,
            applied_amount: Decimal::ZERO,
            mode: request.mode,
            payment_date: request.payment_date,
            reference: request.reference.clone(),
            status: PaymentStatus::Active,
            created_by: request.created_by,
            version: 1,
            created_utc: Utc::now(),
            voided_utc: None,
        };

        let applied =
            PaymentReconciler::record(&payment, invoice.as_ref(), request.allow_overpayment)?;
        payment.applied_amount = applied.applied_amount;

        let delta = BalanceDelta::new(payment.party_id, PartyLedger::payment_delta(None, &payment));
        let committed = self
            .store
            .commit_payment(&payment, applied.invoice.as_ref(), delta)
            .await?;

        PAYMENTS_TOTAL
            .with_label_values(&[payment.direction.as_str(), "record"])
            .inc();
        info!(
            payment_id = %payment.payment_id,
            applied = %payment.applied_amount,
            invoice_status = committed.invoice.as_ref().map(|i| i.status.as_str()),
            "Payment recorded"
        );
        Ok(committed)
    }

    /// Void a payment and reverse what it applied. Voiding twice returns the
    /// already-voided payment.
    #[instrument(skip(self), fields(business_id = %business_id, payment_id = %payment_id))]
    pub async fn void_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentCommit, AppError> {
        let result: Result<PaymentCommit, AppError> = async {
            let payment = self.get_payment(business_id, payment_id).await?;
            let _guard = self
                .locks
                .lock(payment.invoice_id.unwrap_or(payment_id))
                .await;

            retry_on_conflict(&self.retry, "void_payment", move || {
                self.try_void_payment(business_id, payment_id)
            })
            .await
        }
        .await;

        result.inspect_err(|e| record_error("void_payment", e))
    }

    async fn try_void_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentCommit, AppError> {
        let payment = self.get_payment(business_id, payment_id).await?;
        let invoice = match payment.invoice_id {
            Some(invoice_id) => Some(self.get_invoice(business_id, invoice_id).await?),
            None => None,
        };

        let voided = PaymentReconciler::void(&payment, invoice.as_ref(), Utc::now())?;
        if !voided.changed {
            info!("Payment already voided");
            return Ok(PaymentCommit {
                payment: voided.payment,
                invoice: voided.invoice,
            });
        }

        let delta = BalanceDelta::new(
            payment.party_id,
            PartyLedger::payment_delta(Some(&payment), &voided.payment),
        );
        let committed = self
            .store
            .commit_void(&voided.payment, voided.invoice.as_ref(), delta)
            .await?;

        PAYMENTS_TOTAL
            .with_label_values(&[payment.direction.as_str(), "void"])
            .inc();
        info!(reversed = %payment.applied_amount, "Payment voided");
        Ok(committed)
    }

    // -------------------------------------------------------------------------
    // Party balances
    // -------------------------------------------------------------------------

    async fn party_documents(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<(Party, Vec<Invoice>, Vec<Payment>), AppError> {
        let party = self.party(business_id, party_id).await?;
        let invoices = self.store.list_party_invoices(business_id, party_id).await?;
        let payments = self.store.list_party_payments(business_id, party_id).await?;
        Ok((party, invoices, payments))
    }

    /// Balance recomputed from the party's documents.
    #[instrument(skip(self), fields(business_id = %business_id, party_id = %party_id))]
    pub async fn get_party_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<PartyBalance, AppError> {
        let (party, invoices, payments) = self.party_documents(business_id, party_id).await?;
        Ok(PartyLedger::balance(&party, &invoices, &payments))
    }

    #[instrument(skip(self), fields(business_id = %business_id, party_id = %party_id))]
    pub async fn get_party_statement(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<PartyStatement, AppError> {
        let (party, invoices, payments) = self.party_documents(business_id, party_id).await?;
        Ok(PartyLedger::statement(&party, &invoices, &payments))
    }

    /// Compare the stored projection with a full recomputation.
    #[instrument(skip(self), fields(business_id = %business_id, party_id = %party_id))]
    pub async fn verify_party_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<BalanceCheck, AppError> {
        let check = self
            .store
            .reconcile_party_balance(business_id, party_id, false)
            .await?
            .ok_or_else(|| not_found("party balance", party_id))?;
        if !check.is_consistent() {
            warn!(
                projected = %check.projected,
                recomputed = %check.recomputed,
                drift = %check.drift(),
                "Party balance projection out of sync"
            );
        }
        Ok(check)
    }

    /// Verify every party of a tenant, optionally rewriting drifted
    /// projections. Returns the checks that were out of sync.
    ///
    /// Each party is checked and repaired in one store call, so payments
    /// committed while the audit runs are never overwritten.
    #[instrument(skip(self), fields(business_id = %business_id))]
    pub async fn audit_party_balances(
        &self,
        business_id: Uuid,
        repair: bool,
    ) -> Result<Vec<BalanceCheck>, AppError> {
        let mut drifted = Vec::new();

        for party in self.store.list_parties(business_id).await? {
            let Some(check) = self
                .store
                .reconcile_party_balance(business_id, party.party_id, repair)
                .await?
            else {
                continue;
            };
            if check.is_consistent() {
                continue;
            }

            let repaired = if repair { "true" } else { "false" };
            BALANCE_DRIFT_TOTAL.with_label_values(&[repaired]).inc();
            warn!(
                party_id = %party.party_id,
                projected = %check.projected,
                recomputed = %check.recomputed,
                "Party balance projection out of sync"
            );
            if repair {
                info!(party_id = %party.party_id, balance = %check.recomputed, "Projection repaired");
            }
            drifted.push(check);
        }

        info!(drifted = drifted.len(), repair, "Party balance audit finished");
        Ok(drifted)
    }
}
