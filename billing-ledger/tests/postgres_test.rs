//! PostgreSQL store tests.
//!
//! Ignored by default; run with `TEST_DATABASE_URL` set:
//! `cargo test -p billing-ledger --test postgres_test -- --ignored`

mod common;

use std::sync::Arc;

use billing_ledger::models::AdjustmentReason;
use billing_ledger::services::LedgerStore;
use billing_ledger::{BillingService, Database};
use common::*;
use rust_decimal_macros::dec;
use serial_test::serial;
use service_core::error::AppError;

async fn spawn_pg_ledger() -> TestLedger {
    init_tracing();
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for this test");
    let database = Database::new(&database_url, 4, 1)
        .await
        .expect("Failed to connect to test database");
    database
        .health_check()
        .await
        .expect("Test database is not answering");
    database
        .run_migrations()
        .await
        .expect("Failed to run migrations");

    seed(BillingService::new(Arc::new(database), test_settings())).await
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pg_payment_round_trip_keeps_projection() {
    let ledger = spawn_pg_ledger().await;
    let business_id = ledger.business.business_id;
    let party_id = ledger.local_party.party_id;

    let invoice = sale_of_1000(&ledger, &ledger.local_party).await;
    let stored = ledger
        .service
        .get_invoice(business_id, invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored.lines.len(), 1);
    assert_eq!(stored.total, dec!(1180.00));

    let paid = ledger
        .service
        .record_payment(business_id, receipt(&ledger, &invoice, dec!(500)))
        .await
        .unwrap();
    assert_eq!(paid.invoice.unwrap().paid_amount, dec!(500));

    let projected = ledger
        .service
        .store()
        .get_projected_balance(business_id, party_id)
        .await
        .unwrap();
    assert_eq!(projected, Some(dec!(680.00)));

    ledger
        .service
        .void_payment(business_id, paid.payment.payment_id)
        .await
        .unwrap();
    let check = ledger
        .service
        .verify_party_balance(business_id, party_id)
        .await
        .unwrap();
    assert!(check.is_consistent());
    assert_eq!(check.recomputed, dec!(1180.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
#[serial]
async fn test_pg_concurrent_sales_never_oversell() {
    let ledger = spawn_pg_ledger().await;
    let business_id = ledger.business.business_id;
    let item = create_product(&ledger.service, business_id, dec!(10), dec!(2)).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = ledger.service.clone();
        let request = movement(&ledger, dec!(-1), AdjustmentReason::Sale);
        handles.push(tokio::spawn(async move {
            service.adjust_stock(business_id, item.item_id, request).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientStock(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(succeeded, 10);

    let status = ledger
        .service
        .get_item_stock_status(business_id, item.item_id)
        .await
        .unwrap();
    assert_eq!(status.quantity, dec!(0));
    assert!(status.is_low_stock);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
#[serial]
async fn test_pg_repair_holds_the_balance_row() {
    let ledger = spawn_pg_ledger().await;

    let check = repair_while_paying(&ledger).await;
    assert!(check.is_consistent());
    assert_eq!(check.recomputed, dec!(1080.00));
}
