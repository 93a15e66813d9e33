//! Applying and voiding payments against invoices, and the invoice status
//! transitions that follow from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;

use super::money::{check_money, checked_add};
use crate::models::{Invoice, InvoiceStatus, Payment, PaymentStatus};

/// Outcome of applying a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Target invoice with its new paid amount and status.
    pub invoice: Option<Invoice>,
    /// Portion of the payment written to the invoice.
    pub applied_amount: Decimal,
}

/// Outcome of voiding a payment. `changed` is false when it was already void.
#[derive(Debug, Clone, PartialEq)]
pub struct Voided {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
    pub changed: bool,
}

pub struct PaymentReconciler;

impl PaymentReconciler {
    /// Payment status implied by the paid amount.
    pub fn status_for(paid_amount: Decimal, total: Decimal) -> InvoiceStatus {
        if paid_amount.is_zero() {
            InvoiceStatus::Pending
        } else if paid_amount < total {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Paid
        }
    }

    pub fn record(
        payment: &Payment,
        invoice: Option<&Invoice>,
        allow_overpayment: bool,
    ) -> Result<Applied, AppError> {
        if payment.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "payment amount must be greater than zero, got {}",
                payment.amount
            )));
        }
        check_money("payment amount", payment.amount)?;

        let Some(invoice) = invoice else {
            return Ok(Applied {
                invoice: None,
                applied_amount: Decimal::ZERO,
            });
        };

        if invoice.business_id != payment.business_id || invoice.party_id != payment.party_id {
            return Err(AppError::InvoiceMismatch(anyhow::anyhow!(
                "invoice {} does not belong to party {}",
                invoice.invoice_id,
                payment.party_id
            )));
        }
        let expected = invoice.invoice_type.expected_payment_direction();
        if payment.direction != expected {
            return Err(AppError::InvoiceMismatch(anyhow::anyhow!(
                "{} invoice {} cannot be settled by a {} payment",
                invoice.invoice_type,
                invoice.invoice_id,
                payment.direction
            )));
        }
        if !invoice.status.accepts_payments() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} is {} and does not accept payments",
                invoice.invoice_id,
                invoice.status
            )));
        }

        let due = invoice.amount_due();
        let applied_amount = if payment.amount > due {
            if !allow_overpayment {
                return Err(AppError::OverApplied(anyhow::anyhow!(
                    "payment of {} exceeds the {} still due on invoice {}",
                    payment.amount,
                    due,
                    invoice.invoice_id
                )));
            }
            due
        } else {
            payment.amount
        };

        let paid_amount = checked_add("paid amount", invoice.paid_amount, applied_amount)?;
        let updated = Invoice {
            paid_amount,
            status: Self::status_for(paid_amount, invoice.total),
            ..invoice.clone()
        };

        Ok(Applied {
            invoice: Some(updated),
            applied_amount,
        })
    }

    /// Reverse exactly what the payment applied. Voiding twice is a no-op.
    pub fn void(
        payment: &Payment,
        invoice: Option<&Invoice>,
        now: DateTime<Utc>,
    ) -> Result<Voided, AppError> {
        if payment.status == PaymentStatus::Voided {
            return Ok(Voided {
                payment: payment.clone(),
                invoice: invoice.cloned(),
                changed: false,
            });
        }

        let invoice = match invoice {
            Some(invoice) if Some(invoice.invoice_id) != payment.invoice_id => {
                return Err(AppError::InvoiceMismatch(anyhow::anyhow!(
                    "payment {} was not applied to invoice {}",
                    payment.payment_id,
                    invoice.invoice_id
                )));
            }
            Some(invoice) => {
                let paid_amount = (invoice.paid_amount - payment.applied_amount).max(Decimal::ZERO);
                let status = if invoice.is_cancelled() {
                    InvoiceStatus::Cancelled
                } else {
                    Self::status_for(paid_amount, invoice.total)
                };
                Some(Invoice {
                    paid_amount,
                    status,
                    ..invoice.clone()
                })
            }
            None => None,
        };

        Ok(Voided {
            payment: Payment {
                status: PaymentStatus::Voided,
                voided_utc: Some(now),
                ..payment.clone()
            },
            invoice,
            changed: true,
        })
    }

    /// Draft to pending. Already-issued invoices are left as they are.
    pub fn issue(invoice: &Invoice) -> Result<Invoice, AppError> {
        match invoice.status {
            InvoiceStatus::Draft => Ok(Invoice {
                status: Self::status_for(invoice.paid_amount, invoice.total),
                ..invoice.clone()
            }),
            InvoiceStatus::Cancelled => Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} is cancelled",
                invoice.invoice_id
            ))),
            _ => Ok(invoice.clone()),
        }
    }

    /// Cancel an unpaid or partly paid invoice. Cancelling twice is a no-op.
    pub fn cancel(invoice: &Invoice) -> Result<Invoice, AppError> {
        match invoice.status {
            InvoiceStatus::Paid => Err(AppError::InvalidState(anyhow::anyhow!(
                "invoice {} is fully paid and cannot be cancelled",
                invoice.invoice_id
            ))),
            _ => Ok(Invoice {
                status: InvoiceStatus::Cancelled,
                ..invoice.clone()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::money::{check_money, checked_add};
use crate::models::{InvoiceType, PaymentDirection, PaymentMode};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn invoice(total: Decimal) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            party_id: Uuid::new_v4(),
            invoice_type: InvoiceType::Sale,
            invoice_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            due_date: None,
            status: InvoiceStatus::Pending,
            seller_state: "KA".into(),
            place_of_supply: "KA".into(),
            subtotal: total,
            cgst_total: Decimal::ZERO,
            sgst_total: Decimal::ZERO,
            igst_total: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total,
            paid_amount: Decimal::ZERO,
            notes: None,
            version: 1,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
            lines: vec![],
        }
    }

    fn payment_for(invoice: &Invoice, amount: Decimal) -> Payment {
        Payment {
            payment_id: Uuid::new_v4(),
            business_id: invoice.business_id,
            party_id: invoice.party_id,
            invoice_id: Some(invoice.invoice_id),
            direction: PaymentDirection::PaymentIn,
            amount,
            applied_amount: Decimal::ZERO,
            mode: PaymentMode::Upi,
            payment_date: invoice.invoice_date,
            reference: None,
            status: PaymentStatus::Active,
            created_by: Uuid::new_v4(),
            version: 1,
            created_utc: Utc::now(),
            voided_utc: None,
        }
    }

    #[test]
    fn partial_then_full_then_over() {
        let inv = invoice(dec!(1180.00));

        let first = PaymentReconciler::record(&payment_for(&inv, dec!(500)), Some(&inv), false)
            .unwrap();
        let inv = first.invoice.unwrap();
        assert_eq!(inv.paid_amount, dec!(500));
        assert_eq!(inv.status, InvoiceStatus::PartiallyPaid);

        let second = PaymentReconciler::record(&payment_for(&inv, dec!(680)), Some(&inv), false)
            .unwrap();
        let inv = second.invoice.unwrap();
        assert_eq!(inv.paid_amount, dec!(1180.00));
        assert_eq!(inv.status, InvoiceStatus::Paid);

        let err = PaymentReconciler::record(&payment_for(&inv, dec!(1)), Some(&inv), false)
            .unwrap_err();
        assert!(matches!(err, AppError::OverApplied(_)));
    }

    #[test]
    fn overpayment_applies_only_the_due() {
        let inv = invoice(dec!(100));
        let applied =
            PaymentReconciler::record(&payment_for(&inv, dec!(150)), Some(&inv), true).unwrap();
        assert_eq!(applied.applied_amount, dec!(100));
        let inv = applied.invoice.unwrap();
        assert_eq!(inv.paid_amount, dec!(100));
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[test]
    fn mismatches_are_rejected() {
        let inv = invoice(dec!(100));

        let mut wrong_party = payment_for(&inv, dec!(10));
        wrong_party.party_id = Uuid::new_v4();
        let err = PaymentReconciler::record(&wrong_party, Some(&inv), false).unwrap_err();
        assert!(matches!(err, AppError::InvoiceMismatch(_)));

        let mut wrong_direction = payment_for(&inv, dec!(10));
        wrong_direction.direction = PaymentDirection::PaymentOut;
        let err = PaymentReconciler::record(&wrong_direction, Some(&inv), false).unwrap_err();
        assert!(matches!(err, AppError::InvoiceMismatch(_)));
    }

    #[test]
    fn drafts_and_cancelled_invoices_reject_payments() {
        let mut inv = invoice(dec!(100));
        inv.status = InvoiceStatus::Draft;
        let err =
            PaymentReconciler::record(&payment_for(&inv, dec!(10)), Some(&inv), false).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        inv.status = InvoiceStatus::Cancelled;
        let err =
            PaymentReconciler::record(&payment_for(&inv, dec!(10)), Some(&inv), false).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let inv = invoice(dec!(100));
        let err =
            PaymentReconciler::record(&payment_for(&inv, dec!(0)), Some(&inv), false).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn sub_paisa_and_oversized_amounts_are_rejected() {
        let inv = invoice(dec!(1180.00));
        let err = PaymentReconciler::record(&payment_for(&inv, dec!(1179.995)), Some(&inv), false)
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let mut unallocated = payment_for(&inv, dec!(50000000000000000000000000000));
        unallocated.invoice_id = None;
        let err = PaymentReconciler::record(&unallocated, None, false).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn void_restores_paid_amount_and_status() {
        let original = invoice(dec!(1180));
        let mut payment = payment_for(&original, dec!(500));
        let applied = PaymentReconciler::record(&payment, Some(&original), false).unwrap();
        payment.applied_amount = applied.applied_amount;
        let paid = applied.invoice.unwrap();

        let voided = PaymentReconciler::void(&payment, Some(&paid), Utc::now()).unwrap();
        assert!(voided.changed);
        assert_eq!(voided.payment.status, PaymentStatus::Voided);
        let restored = voided.invoice.unwrap();
        assert_eq!(restored.paid_amount, original.paid_amount);
        assert_eq!(restored.status, original.status);

        let again = PaymentReconciler::void(&voided.payment, Some(&restored), Utc::now()).unwrap();
        assert!(!again.changed);
        assert_eq!(again.invoice.unwrap().paid_amount, restored.paid_amount);
    }

    #[test]
    fn void_keeps_cancelled_invoice_cancelled() {
        let mut inv = invoice(dec!(100));
        inv.paid_amount = dec!(40);
        inv.status = InvoiceStatus::Cancelled;
        let mut payment = payment_for(&inv, dec!(40));
        payment.applied_amount = dec!(40);

        let voided = PaymentReconciler::void(&payment, Some(&inv), Utc::now()).unwrap();
        let inv = voided.invoice.unwrap();
        assert_eq!(inv.paid_amount, dec!(0));
        assert_eq!(inv.status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn paid_invoices_cannot_be_cancelled() {
        let mut inv = invoice(dec!(100));
        inv.paid_amount = dec!(100);
        inv.status = InvoiceStatus::Paid;
        assert!(matches!(
            PaymentReconciler::cancel(&inv),
            Err(AppError::InvalidState(_))
        ));

        let mut partly = invoice(dec!(100));
        partly.status = InvoiceStatus::PartiallyPaid;
        let cancelled = PaymentReconciler::cancel(&partly).unwrap();
        assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
        assert_eq!(
            PaymentReconciler::cancel(&cancelled).unwrap().status,
            InvoiceStatus::Cancelled
        );
    }
}
