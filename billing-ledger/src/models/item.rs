//! Inventory item and stock adjustment models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Stocked product or non-stocked service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Product,
    Service,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Service => "service",
        }
    }
}

/// Why a stock quantity moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Sale,
    Purchase,
    ManualCorrection,
    Return,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Purchase => "purchase",
            Self::ManualCorrection => "manual_correction",
            Self::Return => "return",
        }
    }
}

impl std::fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inventory item with its current on-hand quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub item_id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub item_kind: ItemKind,
    pub unit: String,
    pub purchase_price: Decimal,
    pub selling_price: Decimal,
    pub tax_rate: Decimal,
    pub quantity: Decimal,
    pub low_stock_threshold: Decimal,
    /// Bumped on every committed write; stale writers get a conflict.
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl InventoryItem {
    pub fn is_low_stock(&self) -> bool {
        crate::engine::stock::StockLedger::is_low_stock(self.quantity, self.low_stock_threshold)
    }

    pub fn stock_status(&self) -> StockStatus {
        StockStatus {
            item_id: self.item_id,
            name: self.name.clone(),
            unit: self.unit.clone(),
            quantity: self.quantity,
            low_stock_threshold: self.low_stock_threshold,
            is_low_stock: self.is_low_stock(),
        }
    }
}

/// Read model returned by stock queries and adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockStatus {
    pub item_id: Uuid,
    pub name: String,
    pub unit: String,
    pub quantity: Decimal,
    pub low_stock_threshold: Decimal,
    pub is_low_stock: bool,
}

/// Immutable audit record of one stock movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StockAdjustment {
    pub adjustment_id: Uuid,
    pub business_id: Uuid,
    pub item_id: Uuid,
    pub delta: Decimal,
    pub reason: AdjustmentReason,
    pub actor_id: Uuid,
    pub allow_backorder: bool,
    /// The adjustment this one corrects, if any.
    pub amends: Option<Uuid>,
    pub quantity_after: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating an inventory item.
#[derive(Debug, Clone, Validate)]
pub struct CreateItem {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub item_kind: ItemKind,
    #[validate(length(min = 1, max = 32))]
    pub unit: String,
    pub purchase_price: Decimal,
    pub selling_price: Decimal,
    pub tax_rate: Decimal,
    pub opening_quantity: Decimal,
    pub low_stock_threshold: Decimal,
}

/// Input for a stock adjustment request.
#[derive(Debug, Clone)]
pub struct AdjustStock {
    pub delta: Decimal,
    pub reason: AdjustmentReason,
    pub actor_id: Uuid,
    /// Permit the quantity to go below zero (backorder).
    pub allow_backorder: bool,
}
