//! Payment reconciliation tests.

mod common;

use billing_ledger::models::{
    InvoiceStatus, InvoiceType, PaymentDirection, PaymentMode, PaymentStatus, RecordPayment,
};
use billing_ledger::engine::MAX_MONEY;
use billing_ledger::services::LedgerStore;
use common::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::AppError;

#[tokio::test]
async fn test_partial_then_full_then_over_applied() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    let first = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(500)))
        .await
        .unwrap();
    let after_first = first.invoice.unwrap();
    assert_eq!(after_first.paid_amount, dec!(500));
    assert_eq!(after_first.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(first.payment.applied_amount, dec!(500));

    let second = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(680)))
        .await
        .unwrap();
    let after_second = second.invoice.unwrap();
    assert_eq!(after_second.paid_amount, dec!(1180.00));
    assert_eq!(after_second.status, InvoiceStatus::Paid);

    let third = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(1)))
        .await;
    assert!(matches!(third, Err(AppError::OverApplied(_))));

    let stored = ledger
        .service
        .get_invoice(business_id, invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored.paid_amount, dec!(1180.00));

    let balance = ledger
        .service
        .get_party_balance(business_id, ledger.local_party.party_id)
        .await
        .unwrap();
    assert_eq!(balance.signed_amount, dec!(0));
}

#[tokio::test]
async fn test_allowed_overpayment_becomes_party_credit() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    let mut request = receipt(&ledger, &invoice, dec!(1500));
    request.allow_overpayment = true;
    let committed = ledger
        .service
        .record_payment(business_id, request)
        .await
        .unwrap();

    assert_eq!(committed.payment.amount, dec!(1500));
    assert_eq!(committed.payment.applied_amount, dec!(1180.00));
    assert_eq!(committed.payment.unapplied_amount(), dec!(320.00));
    let invoice = committed.invoice.unwrap();
    assert_eq!(invoice.paid_amount, invoice.total);
    assert_eq!(invoice.status, InvoiceStatus::Paid);

    let balance = ledger
        .service
        .get_party_balance(business_id, ledger.local_party.party_id)
        .await
        .unwrap();
    assert_eq!(balance.signed_amount, dec!(-320.00));
}

#[tokio::test]
async fn test_void_restores_invoice_and_balance() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let party_id = ledger.local_party.party_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;
    let balance_before = ledger
        .service
        .get_party_balance(business_id, party_id)
        .await
        .unwrap();

    let recorded = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(400)))
        .await
        .unwrap();

    let voided = ledger
        .service
        .void_payment(business_id, recorded.payment.payment_id)
        .await
        .unwrap();
    assert_eq!(voided.payment.status, PaymentStatus::Voided);
    assert!(voided.payment.voided_utc.is_some());
    let restored = voided.invoice.unwrap();
    assert_eq!(restored.paid_amount, invoice.paid_amount);
    assert_eq!(restored.status, invoice.status);

    let balance_after = ledger
        .service
        .get_party_balance(business_id, party_id)
        .await
        .unwrap();
    assert_eq!(balance_after, balance_before);

    let again = ledger
        .service
        .void_payment(business_id, recorded.payment.payment_id)
        .await
        .unwrap();
    assert_eq!(again.payment.version, voided.payment.version);
    let check = ledger
        .service
        .verify_party_balance(business_id, party_id)
        .await
        .unwrap();
    assert!(check.is_consistent());
    assert_eq!(check.recomputed, balance_before.signed_amount);
}

#[tokio::test]
async fn test_void_of_overpayment_reverses_only_applied_amount() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(1000)))
        .await
        .unwrap();
    let mut request = receipt(&ledger, &invoice, dec!(500));
    request.allow_overpayment = true;
    let over = ledger
        .service
        .record_payment(business_id, request)
        .await
        .unwrap();
    assert_eq!(over.payment.applied_amount, dec!(180.00));

    let voided = ledger
        .service
        .void_payment(business_id, over.payment.payment_id)
        .await
        .unwrap();
    let invoice = voided.invoice.unwrap();
    assert_eq!(invoice.paid_amount, dec!(1000));
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn test_unallocated_payment_only_moves_balance() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let party_id = ledger.local_party.party_id;

    let committed = ledger
        .service
        .record_payment(
            business_id,
            RecordPayment {
                party_id,
                amount: dec!(250),
                direction: PaymentDirection::PaymentIn,
                mode: PaymentMode::Cash,
                invoice_id: None,
                payment_date: date(3),
                reference: Some("advance".to_string()),
                created_by: ledger.actor_id,
                allow_overpayment: false,
            },
        )
        .await
        .unwrap();

    assert!(committed.invoice.is_none());
    assert_eq!(committed.payment.applied_amount, Decimal::ZERO);
    let balance = ledger
        .service
        .get_party_balance(business_id, party_id)
        .await
        .unwrap();
    assert_eq!(balance.signed_amount, dec!(-250));
}

#[tokio::test]
async fn test_mismatched_payments_are_rejected() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    let mut wrong_party = receipt(&ledger, &invoice, dec!(100));
    wrong_party.party_id = ledger.remote_party.party_id;
    let result = ledger.service.record_payment(business_id, wrong_party).await;
    assert!(matches!(result, Err(AppError::InvoiceMismatch(_))));

    let mut wrong_direction = receipt(&ledger, &invoice, dec!(100));
    wrong_direction.direction = PaymentDirection::PaymentOut;
    let result = ledger
        .service
        .record_payment(business_id, wrong_direction)
        .await;
    assert!(matches!(result, Err(AppError::InvoiceMismatch(_))));

    let result = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(-5)))
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let stored = ledger
        .service
        .get_invoice(business_id, invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored.paid_amount, Decimal::ZERO);
    assert_eq!(stored.version, invoice.version);
}

#[tokio::test]
async fn test_purchase_is_settled_by_payment_out() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let party = &ledger.remote_party;

    let bill = ledger
        .service
        .create_invoice(
            business_id,
            invoice_request(
                party.party_id,
                InvoiceType::Purchase,
                vec![free_line(dec!(10), dec!(45.50), dec!(12))],
            ),
        )
        .await
        .unwrap();
    assert_eq!(bill.total, dec!(509.60));

    let mut payment = receipt(&ledger, &bill, dec!(509.60));
    payment.direction = PaymentDirection::PaymentOut;
    let committed = ledger
        .service
        .record_payment(business_id, payment)
        .await
        .unwrap();
    assert_eq!(committed.invoice.unwrap().status, InvoiceStatus::Paid);

    let balance = ledger
        .service
        .get_party_balance(business_id, party.party_id)
        .await
        .unwrap();
    assert_eq!(balance.signed_amount, dec!(0));
}

#[tokio::test]
async fn test_payment_on_cancelled_invoice_is_rejected() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    let partial = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(100)))
        .await
        .unwrap();
    ledger
        .service
        .cancel_invoice(business_id, invoice.invoice_id)
        .await
        .unwrap();

    let result = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(100)))
        .await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));

    let voided = ledger
        .service
        .void_payment(business_id, partial.payment.payment_id)
        .await
        .unwrap();
    let invoice = voided.invoice.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Cancelled);
    assert_eq!(invoice.paid_amount, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payments_never_over_apply() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    let mut handles = Vec::new();
    for _ in 0..12 {
        let service = ledger.service.clone();
        let request = receipt(&ledger, &invoice, dec!(100));
        handles.push(tokio::spawn(async move {
            service.record_payment(business_id, request).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::OverApplied(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    // 11 x 100 fits under 1180; the 12th would exceed it.
    assert_eq!(succeeded, 11);
    let stored = ledger
        .service
        .get_invoice(business_id, invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored.paid_amount, dec!(1100));
    assert!(stored.paid_amount <= stored.total);
    assert_eq!(stored.status, InvoiceStatus::PartiallyPaid);

    let check = ledger
        .service
        .verify_party_balance(business_id, ledger.local_party.party_id)
        .await
        .unwrap();
    assert!(check.is_consistent());
}

fn advance(ledger: &TestLedger, amount: Decimal, direction: PaymentDirection) -> RecordPayment {
    RecordPayment {
        party_id: ledger.local_party.party_id,
        amount,
        direction,
        mode: PaymentMode::Bank,
        invoice_id: None,
        payment_date: date(4),
        reference: None,
        created_by: ledger.actor_id,
        allow_overpayment: false,
    }
}

#[tokio::test]
async fn test_oversized_payments_are_rejected_and_leave_no_trace() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let party_id = ledger.local_party.party_id;
    let huge = dec!(50000000000000000000000000000);

    for _ in 0..2 {
        let result = ledger
            .service
            .record_payment(business_id, advance(&ledger, huge, PaymentDirection::PaymentIn))
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    let payments = ledger
        .service
        .store()
        .list_party_payments(business_id, party_id)
        .await
        .unwrap();
    assert!(payments.is_empty());

    let balance = ledger
        .service
        .get_party_balance(business_id, party_id)
        .await
        .unwrap();
    assert_eq!(balance.signed_amount, Decimal::ZERO);
    assert!(ledger
        .service
        .verify_party_balance(business_id, party_id)
        .await
        .unwrap()
        .is_consistent());
}

#[tokio::test]
async fn test_sub_paisa_payments_are_rejected() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;

    let almost = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(1179.995)))
        .await;
    assert!(matches!(almost, Err(AppError::BadRequest(_))));

    let dust = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(0.001)))
        .await;
    assert!(matches!(dust, Err(AppError::BadRequest(_))));

    let stored = ledger
        .service
        .get_invoice(business_id, invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored.paid_amount, Decimal::ZERO);
    assert_eq!(stored.status, InvoiceStatus::Pending);
}

#[tokio::test]
async fn test_balance_out_of_range_rejects_the_whole_commit() {
    let ledger = spawn_ledger().await;
    let business_id = ledger.business.business_id;
    let party = create_party(&ledger.service, business_id, Some("KA"), MAX_MONEY).await;
    let request = RecordPayment {
        party_id: party.party_id,
        ..advance(&ledger, dec!(1.00), PaymentDirection::PaymentOut)
    };

    // Paying out to a party raises what it owes past the column range.
    let result = ledger.service.record_payment(business_id, request).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let payments = ledger
        .service
        .store()
        .list_party_payments(business_id, party.party_id)
        .await
        .unwrap();
    assert!(payments.is_empty());

    let check = ledger
        .service
        .verify_party_balance(business_id, party.party_id)
        .await
        .unwrap();
    assert!(check.is_consistent());
    assert_eq!(check.projected, MAX_MONEY);
}
