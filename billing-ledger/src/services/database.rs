//! PostgreSQL `LedgerStore`.
//!
//! Each commit runs in one SQL transaction. Versioned rows are updated with
//! `WHERE version = $n`; zero affected rows rolls the transaction back and
//! reports a conflict.

use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::metrics::DB_QUERY_DURATION;
use super::store::{stale, BalanceDelta, LedgerStore, PaymentCommit};
use crate::engine::{BalanceCheck, PartyLedger};
use crate::models::{
    Business, InventoryItem, Invoice, InvoiceLine, Party, Payment, StockAdjustment,
};

const PARTY_COLUMNS: &str = "party_id, business_id, name, party_type, state_code, \
     opening_balance, opening_balance_type, created_utc";

const ITEM_COLUMNS: &str = "item_id, business_id, name, item_kind, unit, purchase_price, \
     selling_price, tax_rate, quantity, low_stock_threshold, version, created_utc, updated_utc";

const ADJUSTMENT_COLUMNS: &str = "adjustment_id, business_id, item_id, delta, reason, actor_id, \
     allow_backorder, amends, quantity_after, created_utc";

const INVOICE_COLUMNS: &str = "invoice_id, business_id, party_id, invoice_type, invoice_date, \
     due_date, status, seller_state, place_of_supply, subtotal, cgst_total, sgst_total, \
     igst_total, tax_amount, total, paid_amount, notes, version, created_utc, updated_utc";

const LINE_COLUMNS: &str = "line_id, invoice_id, business_id, item_id, description, quantity, \
     unit_price, tax_rate, line_amount, cgst, sgst, igst, tax_amount, non_standard_rate, \
     sort_order";

const PAYMENT_COLUMNS: &str = "payment_id, business_id, party_id, invoice_id, direction, amount, \
     applied_amount, mode, payment_date, reference, status, created_by, version, created_utc, \
     voided_utc";

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// `numeric_value_out_of_range`: a value did not fit its NUMERIC column.
fn is_numeric_overflow(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "22003")
}

async fn fetch_party<'e, E>(
    executor: E,
    business_id: Uuid,
    party_id: Uuid,
) -> Result<Option<Party>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT {PARTY_COLUMNS} FROM parties WHERE business_id = $1 AND party_id = $2");
    sqlx::query_as::<_, Party>(&sql)
        .bind(business_id)
        .bind(party_id)
        .fetch_optional(executor)
        .await
        .map_err(db_error("Failed to get party"))
}

/// Headers only; lines are not loaded.
async fn fetch_party_invoices<'e, E>(
    executor: E,
    business_id: Uuid,
    party_id: Uuid,
) -> Result<Vec<Invoice>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices \
         WHERE business_id = $1 AND party_id = $2 ORDER BY invoice_date, created_utc"
    );
    sqlx::query_as::<_, Invoice>(&sql)
        .bind(business_id)
        .bind(party_id)
        .fetch_all(executor)
        .await
        .map_err(db_error("Failed to list invoices"))
}

async fn fetch_party_payments<'e, E>(
    executor: E,
    business_id: Uuid,
    party_id: Uuid,
) -> Result<Vec<Payment>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE business_id = $1 AND party_id = $2 ORDER BY payment_date, created_utc"
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(business_id)
        .bind(party_id)
        .fetch_all(executor)
        .await
        .map_err(db_error("Failed to list payments"))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-ledger"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))
    }

    async fn apply_delta(
        tx: &mut Transaction<'static, Postgres>,
        business_id: Uuid,
        delta: BalanceDelta,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE party_balances
            SET balance = balance + $3, updated_utc = NOW()
            WHERE business_id = $1 AND party_id = $2
            "#,
        )
        .bind(business_id)
        .bind(delta.party_id)
        .bind(delta.amount)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_numeric_overflow(&e) {
                AppError::BadRequest(anyhow::anyhow!(
                    "balance of party {} would leave the supported range",
                    delta.party_id
                ))
            } else {
                db_error("Failed to update party balance")(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "balance projection for party {} not found",
                delta.party_id
            )));
        }
        Ok(())
    }

    async fn write_invoice(
        tx: &mut Transaction<'static, Postgres>,
        invoice: &Invoice,
    ) -> Result<Invoice, AppError> {
        let sql = format!(
            r#"
            UPDATE invoices
            SET status = $3, due_date = $4, seller_state = $5, place_of_supply = $6,
                subtotal = $7, cgst_total = $8, sgst_total = $9, igst_total = $10,
                tax_amount = $11, total = $12, paid_amount = $13, notes = $14,
                version = version + 1, updated_utc = NOW()
            WHERE business_id = $1 AND invoice_id = $2 AND version = $15
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice.business_id)
            .bind(invoice.invoice_id)
            .bind(invoice.status.as_str())
            .bind(invoice.due_date)
            .bind(&invoice.seller_state)
            .bind(&invoice.place_of_supply)
            .bind(invoice.subtotal)
            .bind(invoice.cgst_total)
            .bind(invoice.sgst_total)
            .bind(invoice.igst_total)
            .bind(invoice.tax_amount)
            .bind(invoice.total)
            .bind(invoice.paid_amount)
            .bind(&invoice.notes)
            .bind(invoice.version)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error("Failed to update invoice"))?;

        updated.ok_or_else(|| stale("invoice", invoice.invoice_id, invoice.version))
    }

    async fn insert_lines(
        tx: &mut Transaction<'static, Postgres>,
        lines: &[InvoiceLine],
    ) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO invoice_lines ({LINE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        );
        for line in lines {
            sqlx::query(&sql)
                .bind(line.line_id)
                .bind(line.invoice_id)
                .bind(line.business_id)
                .bind(line.item_id)
                .bind(&line.description)
                .bind(line.quantity)
                .bind(line.unit_price)
                .bind(line.tax_rate)
                .bind(line.line_amount)
                .bind(line.cgst)
                .bind(line.sgst)
                .bind(line.igst)
                .bind(line.tax_amount)
                .bind(line.non_standard_rate)
                .bind(line.sort_order)
                .execute(&mut **tx)
                .await
                .map_err(db_error("Failed to insert invoice line"))?;
        }
        Ok(())
    }

    async fn load_lines(&self, business_id: Uuid, invoice_id: Uuid) -> Result<Vec<InvoiceLine>, AppError> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM invoice_lines \
             WHERE business_id = $1 AND invoice_id = $2 ORDER BY sort_order"
        );
        sqlx::query_as::<_, InvoiceLine>(&sql)
            .bind(business_id)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to load invoice lines"))
    }

    async fn with_lines(&self, mut invoice: Invoice) -> Result<Invoice, AppError> {
        invoice.lines = self
            .load_lines(invoice.business_id, invoice.invoice_id)
            .await?;
        Ok(invoice)
    }

    /// Apply an invoice update inside `tx`; returns the stored invoice.
    async fn update_invoice_in(
        tx: &mut Transaction<'static, Postgres>,
        invoice: &Invoice,
        replace_lines: bool,
    ) -> Result<Invoice, AppError> {
        let mut updated = Self::write_invoice(tx, invoice).await?;
        if replace_lines {
            sqlx::query("DELETE FROM invoice_lines WHERE business_id = $1 AND invoice_id = $2")
                .bind(invoice.business_id)
                .bind(invoice.invoice_id)
                .execute(&mut **tx)
                .await
                .map_err(db_error("Failed to delete invoice lines"))?;
            Self::insert_lines(tx, &invoice.lines).await?;
        }
        updated.lines = invoice.lines.clone();
        Ok(updated)
    }
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self, business), fields(business_id = %business.business_id))]
    async fn insert_business(&self, business: &Business) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO businesses (business_id, name, state_code, default_tax_rate, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(business.business_id)
        .bind(&business.name)
        .bind(&business.state_code)
        .bind(business.default_tax_rate)
        .bind(business.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to create business"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError> {
        sqlx::query_as::<_, Business>(
            r#"
            SELECT business_id, name, state_code, default_tax_rate, created_utc
            FROM businesses
            WHERE business_id = $1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get business"))
    }

    #[instrument(skip(self, party), fields(business_id = %party.business_id, party_id = %party.party_id))]
    async fn insert_party(&self, party: &Party) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_party"])
            .start_timer();
        let mut tx = self.begin().await?;

        let sql = format!(
            "INSERT INTO parties ({PARTY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(party.party_id)
            .bind(party.business_id)
            .bind(&party.name)
            .bind(party.party_type.as_str())
            .bind(&party.state_code)
            .bind(party.opening_balance)
            .bind(party.opening_balance_type.as_str())
            .bind(party.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to create party"))?;

        sqlx::query(
            "INSERT INTO party_balances (party_id, business_id, balance) VALUES ($1, $2, $3)",
        )
        .bind(party.party_id)
        .bind(party.business_id)
        .bind(party.signed_opening_balance())
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to seed party balance"))?;

        tx.commit().await.map_err(db_error("Failed to commit party"))?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_party(&self, business_id: Uuid, party_id: Uuid) -> Result<Option<Party>, AppError> {
        fetch_party(&self.pool, business_id, party_id).await
    }

    #[instrument(skip(self))]
    async fn list_parties(&self, business_id: Uuid) -> Result<Vec<Party>, AppError> {
        let sql = format!(
            "SELECT {PARTY_COLUMNS} FROM parties WHERE business_id = $1 ORDER BY created_utc"
        );
        sqlx::query_as::<_, Party>(&sql)
            .bind(business_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list parties"))
    }

    #[instrument(skip(self, item), fields(business_id = %item.business_id, item_id = %item.item_id))]
    async fn insert_item(&self, item: &InventoryItem) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO inventory_items ({ITEM_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&sql)
            .bind(item.item_id)
            .bind(item.business_id)
            .bind(&item.name)
            .bind(item.item_kind.as_str())
            .bind(&item.unit)
            .bind(item.purchase_price)
            .bind(item.selling_price)
            .bind(item.tax_rate)
            .bind(item.quantity)
            .bind(item.low_stock_threshold)
            .bind(item.version)
            .bind(item.created_utc)
            .bind(item.updated_utc)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to create item"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_item(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<InventoryItem>, AppError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE business_id = $1 AND item_id = $2"
        );
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(business_id)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get item"))
    }

    #[instrument(skip(self))]
    async fn list_items(&self, business_id: Uuid) -> Result<Vec<InventoryItem>, AppError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE business_id = $1 ORDER BY name"
        );
        sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(business_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list items"))
    }

    #[instrument(skip(self, item, adjustment), fields(business_id = %item.business_id, item_id = %item.item_id))]
    async fn commit_stock_adjustment(
        &self,
        item: &InventoryItem,
        adjustment: &StockAdjustment,
    ) -> Result<InventoryItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_stock_adjustment"])
            .start_timer();
        let mut tx = self.begin().await?;

        let sql = format!(
            r#"
            UPDATE inventory_items
            SET quantity = $3, version = version + 1, updated_utc = $5
            WHERE business_id = $1 AND item_id = $2 AND version = $4
            RETURNING {ITEM_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, InventoryItem>(&sql)
            .bind(item.business_id)
            .bind(item.item_id)
            .bind(item.quantity)
            .bind(item.version)
            .bind(adjustment.created_utc)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to update item quantity"))?
            .ok_or_else(|| stale("item", item.item_id, item.version))?;

        let sql = format!(
            "INSERT INTO stock_adjustments ({ADJUSTMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(adjustment.adjustment_id)
            .bind(adjustment.business_id)
            .bind(adjustment.item_id)
            .bind(adjustment.delta)
            .bind(adjustment.reason.as_str())
            .bind(adjustment.actor_id)
            .bind(adjustment.allow_backorder)
            .bind(adjustment.amends)
            .bind(adjustment.quantity_after)
            .bind(adjustment.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to record stock adjustment"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit stock adjustment"))?;
        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn get_stock_adjustment(
        &self,
        business_id: Uuid,
        adjustment_id: Uuid,
    ) -> Result<Option<StockAdjustment>, AppError> {
        let sql = format!(
            "SELECT {ADJUSTMENT_COLUMNS} FROM stock_adjustments \
             WHERE business_id = $1 AND adjustment_id = $2"
        );
        sqlx::query_as::<_, StockAdjustment>(&sql)
            .bind(business_id)
            .bind(adjustment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get stock adjustment"))
    }

    #[instrument(skip(self))]
    async fn list_stock_adjustments(
        &self,
        business_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<StockAdjustment>, AppError> {
        let sql = format!(
            "SELECT {ADJUSTMENT_COLUMNS} FROM stock_adjustments \
             WHERE business_id = $1 AND item_id = $2 ORDER BY created_utc, adjustment_id"
        );
        sqlx::query_as::<_, StockAdjustment>(&sql)
            .bind(business_id)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list stock adjustments"))
    }

    #[instrument(skip(self, invoice), fields(business_id = %invoice.business_id, invoice_id = %invoice.invoice_id))]
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        delta: BalanceDelta,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();
        let mut tx = self.begin().await?;

        let sql = format!(
            "INSERT INTO invoices ({INVOICE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        );
        sqlx::query(&sql)
            .bind(invoice.invoice_id)
            .bind(invoice.business_id)
            .bind(invoice.party_id)
            .bind(invoice.invoice_type.as_str())
            .bind(invoice.invoice_date)
            .bind(invoice.due_date)
            .bind(invoice.status.as_str())
            .bind(&invoice.seller_state)
            .bind(&invoice.place_of_supply)
            .bind(invoice.subtotal)
            .bind(invoice.cgst_total)
            .bind(invoice.sgst_total)
            .bind(invoice.igst_total)
            .bind(invoice.tax_amount)
            .bind(invoice.total)
            .bind(invoice.paid_amount)
            .bind(&invoice.notes)
            .bind(invoice.version)
            .bind(invoice.created_utc)
            .bind(invoice.updated_utc)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to create invoice"))?;

        Self::insert_lines(&mut tx, &invoice.lines).await?;
        Self::apply_delta(&mut tx, invoice.business_id, delta).await?;

        tx.commit().await.map_err(db_error("Failed to commit invoice"))?;
        timer.observe_duration();

        Ok(invoice.clone())
    }

    #[instrument(skip(self, invoice), fields(business_id = %invoice.business_id, invoice_id = %invoice.invoice_id))]
    async fn update_invoice(
        &self,
        invoice: &Invoice,
        replace_lines: bool,
        delta: BalanceDelta,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();
        let mut tx = self.begin().await?;

        let updated = Self::update_invoice_in(&mut tx, invoice, replace_lines).await?;
        Self::apply_delta(&mut tx, invoice.business_id, delta).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit invoice update"))?;
        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn get_invoice(
        &self,
        business_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE business_id = $1 AND invoice_id = $2"
        );
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(business_id)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get invoice"))?;

        match invoice {
            Some(invoice) => Ok(Some(self.with_lines(invoice).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_party_invoices(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        fetch_party_invoices(&self.pool, business_id, party_id).await
    }

    #[instrument(skip(self, payment, invoice), fields(business_id = %payment.business_id, payment_id = %payment.payment_id))]
    async fn commit_payment(
        &self,
        payment: &Payment,
        invoice: Option<&Invoice>,
        delta: BalanceDelta,
    ) -> Result<PaymentCommit, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_payment"])
            .start_timer();
        let mut tx = self.begin().await?;

        let updated_invoice = match invoice {
            Some(invoice) => Some(Self::update_invoice_in(&mut tx, invoice, false).await?),
            None => None,
        };

        let sql = format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let stored = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment.payment_id)
            .bind(payment.business_id)
            .bind(payment.party_id)
            .bind(payment.invoice_id)
            .bind(payment.direction.as_str())
            .bind(payment.amount)
            .bind(payment.applied_amount)
            .bind(payment.mode.as_str())
            .bind(payment.payment_date)
            .bind(&payment.reference)
            .bind(payment.status.as_str())
            .bind(payment.created_by)
            .bind(payment.version)
            .bind(payment.created_utc)
            .bind(payment.voided_utc)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to record payment"))?;

        Self::apply_delta(&mut tx, payment.business_id, delta).await?;

        tx.commit().await.map_err(db_error("Failed to commit payment"))?;
        timer.observe_duration();

        Ok(PaymentCommit {
            payment: stored,
            invoice: updated_invoice,
        })
    }

    #[instrument(skip(self, payment, invoice), fields(business_id = %payment.business_id, payment_id = %payment.payment_id))]
    async fn commit_void(
        &self,
        payment: &Payment,
        invoice: Option<&Invoice>,
        delta: BalanceDelta,
    ) -> Result<PaymentCommit, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_void"])
            .start_timer();
        let mut tx = self.begin().await?;

        let sql = format!(
            r#"
            UPDATE payments
            SET status = $3, voided_utc = $4, version = version + 1
            WHERE business_id = $1 AND payment_id = $2 AND version = $5
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment.business_id)
            .bind(payment.payment_id)
            .bind(payment.status.as_str())
            .bind(payment.voided_utc)
            .bind(payment.version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to void payment"))?
            .ok_or_else(|| stale("payment", payment.payment_id, payment.version))?;

        let updated_invoice = match invoice {
            Some(invoice) => Some(Self::update_invoice_in(&mut tx, invoice, false).await?),
            None => None,
        };

        Self::apply_delta(&mut tx, payment.business_id, delta).await?;

        tx.commit().await.map_err(db_error("Failed to commit void"))?;
        timer.observe_duration();

        Ok(PaymentCommit {
            payment: stored,
            invoice: updated_invoice,
        })
    }

    #[instrument(skip(self))]
    async fn get_payment(
        &self,
        business_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE business_id = $1 AND payment_id = $2"
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(business_id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get payment"))
    }

    #[instrument(skip(self))]
    async fn list_party_payments(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        fetch_party_payments(&self.pool, business_id, party_id).await
    }

    #[instrument(skip(self))]
    async fn get_projected_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
    ) -> Result<Option<Decimal>, AppError> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM party_balances WHERE business_id = $1 AND party_id = $2",
        )
        .bind(business_id)
        .bind(party_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get party balance"))
    }

    #[instrument(skip(self))]
    async fn reconcile_party_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
        repair: bool,
    ) -> Result<Option<BalanceCheck>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_party_balance"])
            .start_timer();
        let mut tx = self.begin().await?;

        // Every balance-moving commit updates this row, so they queue behind
        // the lock and the documents read below are the full set.
        let projected = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM party_balances \
             WHERE business_id = $1 AND party_id = $2 FOR UPDATE",
        )
        .bind(business_id)
        .bind(party_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock party balance"))?;
        let Some(projected) = projected else {
            return Ok(None);
        };
        let Some(party) = fetch_party(&mut *tx, business_id, party_id).await? else {
            return Ok(None);
        };

        let invoices = fetch_party_invoices(&mut *tx, business_id, party_id).await?;
        let payments = fetch_party_payments(&mut *tx, business_id, party_id).await?;
        let check = PartyLedger::verify(&party, projected, &invoices, &payments);

        if repair && !check.is_consistent() {
            sqlx::query(
                r#"
                UPDATE party_balances
                SET balance = $3, updated_utc = NOW()
                WHERE business_id = $1 AND party_id = $2
                "#,
            )
            .bind(business_id)
            .bind(party_id)
            .bind(check.recomputed)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to repair party balance"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit balance reconciliation"))?;
        timer.observe_duration();
        Ok(Some(check))
    }

    #[instrument(skip(self))]
    async fn set_projected_balance(
        &self,
        business_id: Uuid,
        party_id: Uuid,
        balance: Decimal,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE party_balances
            SET balance = $3, updated_utc = NOW()
            WHERE business_id = $1 AND party_id = $2
            "#,
        )
        .bind(business_id)
        .bind(party_id)
        .bind(balance)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to set party balance"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("party {} not found", party_id)));
        }
        Ok(())
    }
}
