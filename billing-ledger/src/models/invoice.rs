//! Invoice model for the billing ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::payment::PaymentDirection;

/// Sale (we bill the party) or purchase (the party bills us).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    Sale,
    Purchase,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Sale => "sale",
            InvoiceType::Purchase => "purchase",
        }
    }

    /// Direction a payment settling this invoice must have.
    pub fn expected_payment_direction(&self) -> PaymentDirection {
        match self {
            InvoiceType::Sale => PaymentDirection::PaymentIn,
            InvoiceType::Purchase => PaymentDirection::PaymentOut,
        }
    }
}

impl std::fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Whether payments may be applied to an invoice in this status.
    pub fn accepts_payments(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub business_id: Uuid,
    pub party_id: Uuid,
    pub invoice_type: InvoiceType,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: InvoiceStatus,
    pub seller_state: String,
    pub place_of_supply: String,
    pub subtotal: Decimal,
    pub cgst_total: Decimal,
    pub sgst_total: Decimal,
    pub igst_total: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub notes: Option<String>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[sqlx(skip)]
    pub lines: Vec<InvoiceLine>,
}

impl Invoice {
    pub fn amount_due(&self) -> Decimal {
        (self.total - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }
}

/// Line on an invoice. `item_id` is empty for free-text lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceLine {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub business_id: Uuid,
    pub item_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub line_amount: Decimal,
    pub cgst: Decimal,
    pub sgst: Decimal,
    pub igst: Decimal,
    pub tax_amount: Decimal,
    pub non_standard_rate: bool,
    pub sort_order: i32,
}

/// Input line for creating or editing an invoice.
///
/// When `tax_rate` is omitted the referenced item's rate is used, then the
/// business default.
#[derive(Debug, Clone)]
pub struct CreateInvoiceLine {
    pub item_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Option<Decimal>,
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub party_id: Uuid,
    pub invoice_type: InvoiceType,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub lines: Vec<CreateInvoiceLine>,
    /// Keep the invoice editable instead of issuing it as pending.
    pub draft: bool,
    pub notes: Option<String>,
}
