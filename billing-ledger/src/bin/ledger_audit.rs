//! Party balance audit tool.
//!
//! Recomputes every party balance of one business from its invoices and
//! payments and compares it with the stored projection.
//!
//! # Usage
//! ```bash
//! DATABASE_URL=postgres://... ledger-audit --business BUSINESS_ID [--repair]
//! ```
//!
//! Exits with status 2 when drift is found and `--repair` was not given.

use std::sync::Arc;

use billing_ledger::config::LedgerConfig;
use billing_ledger::services::metrics::init_metrics;
use billing_ledger::{BillingService, Database};
use clap::Parser;
use service_core::observability::init_tracing;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "ledger-audit",
    about = "Verify party balance projections against their documents",
    version
)]
struct Args {
    #[arg(
        long = "business",
        env = "LEDGER_AUDIT_BUSINESS_ID",
        help = "Business whose parties are audited"
    )]
    business_id: Uuid,
    #[arg(long, help = "Rewrite drifted projections to the recomputed balance")]
    repair: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(
        "ledger-audit",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
        config.common.log_json,
    );
    init_metrics();

    tracing::info!(
        business_id = %args.business_id,
        repair = args.repair,
        version = %config.service_version,
        "Starting party balance audit"
    );

    let database = match config.require_database() {
        Ok(db) => Database::new(&db.url, db.max_connections, db.min_connections).await,
        Err(e) => Err(e),
    };
    let database = match database {
        Ok(database) => database,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = database.run_migrations().await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }

    let service = BillingService::new(Arc::new(database), config.settings.clone());

    match service
        .audit_party_balances(args.business_id, args.repair)
        .await
    {
        Ok(drifted) if drifted.is_empty() => {
            tracing::info!("All party balances match their documents");
        }
        Ok(drifted) => {
            for check in &drifted {
                tracing::warn!(
                    party_id = %check.party_id,
                    projected = %check.projected,
                    recomputed = %check.recomputed,
                    "Balance drift"
                );
            }
            if !args.repair {
                tracing::error!(
                    drifted = drifted.len(),
                    "Drift found; rerun with --repair to rewrite projections"
                );
                std::process::exit(2);
            }
            tracing::info!(repaired = drifted.len(), "Projections repaired");
        }
        Err(e) => {
            tracing::error!(error = %e, "Audit failed");
            std::process::exit(1);
        }
    }
}
