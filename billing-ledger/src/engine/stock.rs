//! On-hand quantity rules for inventory items.

use rust_decimal::Decimal;
use service_core::error::AppError;

use super::money::{check_quantity, checked_add};
use crate::models::{AdjustStock, InventoryItem, ItemKind};

pub struct StockLedger;

impl StockLedger {
    /// Low stock only applies when a positive threshold is configured.
    pub fn is_low_stock(quantity: Decimal, threshold: Decimal) -> bool {
        threshold > Decimal::ZERO && quantity <= threshold
    }

    /// Returns the item as it would be after the movement. The input is
    /// never modified, so a rejected movement leaves nothing to undo.
    pub fn apply(item: &InventoryItem, movement: &AdjustStock) -> Result<InventoryItem, AppError> {
        if item.item_kind == ItemKind::Service {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "item {} is a service and does not carry stock",
                item.item_id
            )));
        }
        if movement.delta.is_zero() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "stock adjustment delta must be non-zero"
            )));
        }

        check_quantity("stock adjustment delta", movement.delta)?;

        let quantity = checked_add("stock quantity", item.quantity, movement.delta)?;
        if quantity < Decimal::ZERO && !movement.allow_backorder {
            return Err(AppError::InsufficientStock(anyhow::anyhow!(
                "item {} has {} on hand, cannot apply {}",
                item.item_id,
                item.quantity,
                movement.delta
            )));
        }

        check_quantity("resulting stock quantity", quantity)?;

        Ok(InventoryItem {
            quantity,
            ..item.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdjustmentReason;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn item(quantity: Decimal, threshold: Decimal) -> InventoryItem {
        InventoryItem {
            item_id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            name: "Rice 5kg".into(),
            item_kind: ItemKind::Product,
            unit: "bag".into(),
            purchase_price: dec!(300),
            selling_price: dec!(350),
            tax_rate: dec!(5),
            quantity,
            low_stock_threshold: threshold,
            version: 1,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn sale(delta: Decimal) -> AdjustStock {
        AdjustStock {
            delta,
            reason: AdjustmentReason::Sale,
            actor_id: Uuid::new_v4(),
            allow_backorder: false,
        }
    }

    #[test]
    fn sale_into_low_stock_then_rejected_oversell() {
        let start = item(dec!(10), dec!(5));

        let after = StockLedger::apply(&start, &sale(dec!(-7))).unwrap();
        assert_eq!(after.quantity, dec!(3));
        assert!(after.is_low_stock());

        let err = StockLedger::apply(&after, &sale(dec!(-5))).unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock(_)));
        assert_eq!(after.quantity, dec!(3));
    }

    #[test]
    fn backorder_allows_negative_quantity() {
        let mut movement = sale(dec!(-4));
        movement.allow_backorder = true;
        let after = StockLedger::apply(&item(dec!(1), dec!(0)), &movement).unwrap();
        assert_eq!(after.quantity, dec!(-3));
    }

    #[test]
    fn zero_threshold_never_low() {
        assert!(!StockLedger::is_low_stock(dec!(0), dec!(0)));
        assert!(StockLedger::is_low_stock(dec!(5), dec!(5)));
        assert!(!StockLedger::is_low_stock(dec!(5.01), dec!(5)));
    }

    #[test]
    fn zero_delta_and_service_items_are_rejected() {
        let err = StockLedger::apply(&item(dec!(1), dec!(0)), &sale(dec!(0))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let mut service = item(dec!(0), dec!(0));
        service.item_kind = ItemKind::Service;
        let err = StockLedger::apply(&service, &sale(dec!(1))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn out_of_range_deltas_are_rejected() {
        let err = StockLedger::apply(&item(dec!(1), dec!(0)), &sale(dec!(0.0001))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let mut movement = sale(Decimal::MAX);
        movement.reason = AdjustmentReason::Purchase;
        let err = StockLedger::apply(&item(dec!(1), dec!(0)), &movement).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // Delta fits, the resulting quantity does not.
        let near_max = item(dec!(999999999999999), dec!(0));
        let err = StockLedger::apply(&near_max, &sale(dec!(1))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn fractional_quantities_are_supported() {
        let after = StockLedger::apply(&item(dec!(2.5), dec!(1)), &sale(dec!(-1.75))).unwrap();
        assert_eq!(after.quantity, dec!(0.75));
        assert!(after.is_low_stock());
    }
}
