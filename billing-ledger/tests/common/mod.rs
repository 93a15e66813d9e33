//! Common test utilities for billing-ledger integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use billing_ledger::config::LedgerSettings;
use billing_ledger::engine::BalanceCheck;
use billing_ledger::models::{
    AdjustmentReason, AdjustStock, Business, CreateBusiness, CreateInvoice, CreateInvoiceLine,
    CreateItem, CreateParty, InventoryItem, Invoice, InvoiceType, ItemKind, OpeningBalanceType,
    Party, PartyType, PaymentDirection, PaymentMode, RecordPayment,
};
use billing_ledger::services::LedgerStore;
use billing_ledger::{BillingService, MemoryStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::retry::RetryConfig;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,billing_ledger=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_settings() -> LedgerSettings {
    LedgerSettings {
        conflict_retry: RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
            ..RetryConfig::with_max_retries(10)
        },
        ..LedgerSettings::default()
    }
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
}

/// A business in Karnataka with one local and one out-of-state party.
pub struct TestLedger {
    pub service: BillingService,
    pub business: Business,
    pub local_party: Party,
    pub remote_party: Party,
    pub actor_id: Uuid,
}

pub async fn spawn_ledger() -> TestLedger {
    init_tracing();
    let service = BillingService::new(Arc::new(MemoryStore::new()), test_settings());
    seed(service).await
}

pub async fn seed(service: BillingService) -> TestLedger {
    let business = service
        .create_business(CreateBusiness {
            name: "Kaveri Stores".to_string(),
            state_code: "KA".to_string(),
            default_tax_rate: dec!(18),
        })
        .await
        .expect("Failed to create business");

    let local_party = create_party(&service, business.business_id, Some("ka"), dec!(0)).await;
    let remote_party = create_party(&service, business.business_id, Some("MH"), dec!(0)).await;

    TestLedger {
        service,
        business,
        local_party,
        remote_party,
        actor_id: Uuid::new_v4(),
    }
}

pub async fn create_party(
    service: &BillingService,
    business_id: Uuid,
    state_code: Option<&str>,
    opening_debit: Decimal,
) -> Party {
    service
        .create_party(
            business_id,
            CreateParty {
                name: format!("Party {}", Uuid::new_v4()),
                party_type: PartyType::Both,
                state_code: state_code.map(str::to_string),
                opening_balance: opening_debit,
                opening_balance_type: OpeningBalanceType::Debit,
            },
        )
        .await
        .expect("Failed to create party")
}

pub async fn create_product(
    service: &BillingService,
    business_id: Uuid,
    quantity: Decimal,
    threshold: Decimal,
) -> InventoryItem {
    service
        .create_item(
            business_id,
            CreateItem {
                name: format!("Item {}", Uuid::new_v4()),
                item_kind: ItemKind::Product,
                unit: "pcs".to_string(),
                purchase_price: dec!(80),
                selling_price: dec!(100),
                tax_rate: dec!(12),
                opening_quantity: quantity,
                low_stock_threshold: threshold,
            },
        )
        .await
        .expect("Failed to create item")
}

pub fn free_line(quantity: Decimal, unit_price: Decimal, rate: Decimal) -> CreateInvoiceLine {
    CreateInvoiceLine {
        item_id: None,
        description: "Consulting".to_string(),
        quantity,
        unit_price,
        tax_rate: Some(rate),
    }
}

pub fn invoice_request(
    party_id: Uuid,
    invoice_type: InvoiceType,
    lines: Vec<CreateInvoiceLine>,
) -> CreateInvoice {
    CreateInvoice {
        party_id,
        invoice_type,
        invoice_date: date(1),
        due_date: Some(date(30)),
        lines,
        draft: false,
        notes: None,
    }
}

/// Issued sale invoice: 1 x 1000.00 at 18%.
pub async fn sale_of_1000(ledger: &TestLedger, party: &Party) -> Invoice {
    ledger
        .service
        .create_invoice(
            ledger.business.business_id,
            invoice_request(
                party.party_id,
                InvoiceType::Sale,
                vec![free_line(dec!(1), dec!(1000.00), dec!(18))],
            ),
        )
        .await
        .expect("Failed to create invoice")
}

pub fn receipt(ledger: &TestLedger, invoice: &Invoice, amount: Decimal) -> RecordPayment {
    RecordPayment {
        party_id: invoice.party_id,
        amount,
        direction: PaymentDirection::PaymentIn,
        mode: PaymentMode::Bank,
        invoice_id: Some(invoice.invoice_id),
        payment_date: date(5),
        reference: None,
        created_by: ledger.actor_id,
        allow_overpayment: false,
    }
}

pub fn movement(ledger: &TestLedger, delta: Decimal, reason: AdjustmentReason) -> AdjustStock {
    AdjustStock {
        delta,
        reason,
        actor_id: ledger.actor_id,
        allow_backorder: false,
    }
}

/// Drift the local party's projection, then run a repairing audit while ten
/// unallocated receipts of 10.00 are committed for the same party. Returns
/// the check taken after everything settled.
pub async fn repair_while_paying(ledger: &TestLedger) -> BalanceCheck {
    let business_id = ledger.business.business_id;
    let party_id = ledger.local_party.party_id;
    sale_of_1000(ledger, &ledger.local_party).await;
    ledger
        .service
        .store()
        .set_projected_balance(business_id, party_id, dec!(42))
        .await
        .expect("Failed to drift projection");

    let mut payments = Vec::new();
    let mut audit = None;
    for i in 0..10 {
        if i == 3 {
            let service = ledger.service.clone();
            audit = Some(tokio::spawn(async move {
                service.audit_party_balances(business_id, true).await
            }));
        }
        let service = ledger.service.clone();
        let request = RecordPayment {
            party_id,
            amount: dec!(10.00),
            direction: PaymentDirection::PaymentIn,
            mode: PaymentMode::Upi,
            invoice_id: None,
            payment_date: date(6),
            reference: None,
            created_by: ledger.actor_id,
            allow_overpayment: false,
        };
        payments.push(tokio::spawn(async move {
            service.record_payment(business_id, request).await
        }));
    }

    for handle in payments {
        handle
            .await
            .expect("payment task panicked")
            .expect("Failed to record payment");
    }
    if let Some(handle) = audit {
        handle
            .await
            .expect("audit task panicked")
            .expect("Failed to audit balances");
    }

    ledger
        .service
        .verify_party_balance(business_id, party_id)
        .await
        .expect("Failed to verify balance")
}
