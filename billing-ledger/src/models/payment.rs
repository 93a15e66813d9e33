//! Payment (money movement) model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Money received from (in) or paid to (out) a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    PaymentIn,
    PaymentOut,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentIn => "payment_in",
            Self::PaymentOut => "payment_out",
        }
    }
}

impl std::fmt::Display for PaymentDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Cash,
    Bank,
    Upi,
    Cheque,
    Card,
    Credit,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Bank => "bank",
            Self::Upi => "upi",
            Self::Cheque => "cheque",
            Self::Card => "card",
            Self::Credit => "credit",
        }
    }
}

/// Payment status. Voiding is the only retraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Active,
    Voided,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Voided => "voided",
        }
    }
}

/// Recorded payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub business_id: Uuid,
    pub party_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub direction: PaymentDirection,
    pub amount: Decimal,
    /// Portion of `amount` written to the invoice's paid amount.
    pub applied_amount: Decimal,
    pub mode: PaymentMode,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub status: PaymentStatus,
    pub created_by: Uuid,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub voided_utc: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_active(&self) -> bool {
        self.status == PaymentStatus::Active
    }

    /// Amount not applied to any invoice; carried as party credit.
    pub fn unapplied_amount(&self) -> Decimal {
        self.amount - self.applied_amount
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub party_id: Uuid,
    pub amount: Decimal,
    pub direction: PaymentDirection,
    pub mode: PaymentMode,
    pub invoice_id: Option<Uuid>,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub created_by: Uuid,
    /// Accept amounts beyond the invoice's due; the excess becomes credit.
    pub allow_overpayment: bool,
}
