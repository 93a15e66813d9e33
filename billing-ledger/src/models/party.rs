//! Party (customer / supplier) model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Role a party plays for the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartyType {
    Customer,
    Supplier,
    Both,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Supplier => "supplier",
            Self::Both => "both",
        }
    }
}

/// Which side of the books the opening balance sits on.
///
/// Debit means the party owes the business, credit means the business owes
/// the party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OpeningBalanceType {
    Debit,
    Credit,
}

impl OpeningBalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

impl std::fmt::Display for OpeningBalanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trading partner. The running balance is never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Party {
    pub party_id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub party_type: PartyType,
    /// Billing state; `None` means the place of supply is the seller's state.
    pub state_code: Option<String>,
    pub opening_balance: Decimal,
    pub opening_balance_type: OpeningBalanceType,
    pub created_utc: DateTime<Utc>,
}

impl Party {
    /// Opening balance in the ledger's sign convention (receivable positive).
    pub fn signed_opening_balance(&self) -> Decimal {
        match self.opening_balance_type {
            OpeningBalanceType::Debit => self.opening_balance,
            OpeningBalanceType::Credit => -self.opening_balance,
        }
    }
}

/// Input for creating a party.
#[derive(Debug, Clone, Validate)]
pub struct CreateParty {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub party_type: PartyType,
    #[validate(length(min = 1, max = 8))]
    pub state_code: Option<String>,
    pub opening_balance: Decimal,
    pub opening_balance_type: OpeningBalanceType,
}
