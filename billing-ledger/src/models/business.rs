//! Business (tenant) model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// The tenant. Owns every other entity through `business_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Business {
    pub business_id: Uuid,
    pub name: String,
    /// Legal jurisdiction, compared against the buyer's state for GST.
    pub state_code: String,
    pub default_tax_rate: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for onboarding a business.
#[derive(Debug, Clone, Validate)]
pub struct CreateBusiness {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 8))]
    pub state_code: String,
    pub default_tax_rate: Decimal,
}
