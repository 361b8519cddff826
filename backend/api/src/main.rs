use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod error;
mod gateway_adapter;
mod handlers;
mod state;

use concord_core::balance::BalanceProjector;
use concord_core::checkout::CheckoutService;
use concord_core::emergent::EmergentLedger;
use concord_core::fee_split::FeeSplitEngine;
use concord_core::ledger::LedgerService;
use concord_core::purchase::PurchaseOrchestrator;
use concord_core::reconcile::Reconciler;
use concord_core::royalty::RoyaltyEngine;
use concord_core::transfer::TransferFlow;
use concord_core::treasury::TreasuryService;
use concord_core::vault::Vault;
use concord_core::withdrawal::WithdrawalFlow;
use concord_core::Config;
use concord_gateway::MockGateway;

use config::Args;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    info!("starting concord-api v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let pool = concord_core::db::connect(&config.database).await?;
    concord_core::db::run_migrations(&pool).await?;
    info!("database connected and migrations applied");

    let state = build_state(config, pool);

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("concord-api shutdown complete");
    Ok(())
}

fn build_state(config: Config, pool: sqlx::PgPool) -> AppState {
    let ledger = LedgerService::new(pool.clone());
    let balance = BalanceProjector::new(pool.clone());
    let treasury = TreasuryService::new(pool.clone(), config.treasury.clone());
    let fee_split = FeeSplitEngine::new(pool.clone(), config.fees.clone());
    let royalty = RoyaltyEngine::new(pool.clone(), config.royalty.clone());
    let purchase = PurchaseOrchestrator::new(
        pool.clone(),
        config.fees.clone(),
        RoyaltyEngine::new(pool.clone(), config.royalty.clone()),
        FeeSplitEngine::new(pool.clone(), config.fees.clone()),
    );
    let emergent = EmergentLedger::new(pool.clone(), config.fees.clone());
    let vault = Vault::new(pool.clone(), config.vault.clone());
    let reconciler = Reconciler::new(
        pool.clone(),
        config.reconciler.clone(),
        TreasuryService::new(pool.clone(), config.treasury.clone()),
    );
    let withdrawal = WithdrawalFlow::new(
        pool.clone(),
        config.fees.clone(),
        TreasuryService::new(pool.clone(), config.treasury.clone()),
    );
    let transfer = TransferFlow::new(
        pool.clone(),
        config.fees.clone(),
        FeeSplitEngine::new(pool.clone(), config.fees.clone()),
    );
    let checkout = CheckoutService::new(
        pool.clone(),
        LedgerService::new(pool.clone()),
        TreasuryService::new(pool.clone(), config.treasury.clone()),
    );
    let gateway: Arc<dyn concord_gateway::PaymentsGateway> = Arc::new(MockGateway::new());

    AppState {
        config: Arc::new(config),
        ledger: Arc::new(ledger),
        balance: Arc::new(balance),
        treasury: Arc::new(treasury),
        fee_split: Arc::new(fee_split),
        royalty: Arc::new(royalty),
        purchase: Arc::new(purchase),
        emergent: Arc::new(emergent),
        vault: Arc::new(vault),
        reconciler: Arc::new(reconciler),
        withdrawal: Arc::new(withdrawal),
        transfer: Arc::new(transfer),
        checkout: Arc::new(checkout),
        gateway,
    }
}

fn build_router(state: AppState) -> Router {
    use handlers::*;

    let api_v1 = Router::new()
        .route("/health", get(health::health_check))
        .route("/ledger/:account", get(ledger::get_entries))
        .route("/ledger/ref/:ref_id", get(ledger::check_ref))
        .route("/balance/:account", get(balance::get_balance))
        .route("/balance", get(balance::system_summary))
        .route("/treasury", get(treasury::get_state))
        .route("/treasury/clear-drift-alert", post(treasury::clear_drift_alert))
        .route("/purchases", post(purchase::create_purchase))
        .route("/purchases/:purchase_id/refund", post(purchase::refund_purchase))
        .route("/emergent", post(emergent::create_emergent_account))
        .route("/emergent/:emergent_id/move-to-reserve", post(emergent::move_to_reserve))
        .route("/emergent/:emergent_id/consistency", get(emergent::consistency_check))
        .route("/vault", post(vault::store))
        .route("/vault/:hash/decrement-ref", post(vault::decrement_ref))
        .route("/vault/sweep", post(vault::sweep))
        .route("/reconcile/run", post(reconcile::run))
        .route("/reconcile/stale-pending", get(reconcile::stale_pending))
        .route("/withdrawals", post(withdrawal::withdraw))
        .route("/transfers", post(transfer::create_transfer))
        .route("/webhooks/checkout", post(checkout::checkout_webhook));

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("concord_api={level},tower_http=debug").into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c"),
        _ = terminate => info!("received terminate signal"),
    }

    info!("starting graceful shutdown");
}
