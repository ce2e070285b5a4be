use std::sync::Arc;
use std::time::Duration;

use sea_orm::Database;
use tracing::info;

use ledgerline_billing::config::BillingConfig;
use ledgerline_billing::router::build_router;
use ledgerline_billing::state::AppState;
use ledgerline_billing::worker::{
    run_notification_sweep, run_outbox_dispatcher, run_stuck_webhook_watchdog,
};
use ledgerline_core::tracing::init_tracing;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = BillingConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.adapter_timeout_ms))
        .build()
        .expect("failed to build HTTP client");

    if config.export_allowed_hosts.is_empty() {
        info!("EXPORT_ALLOWED_HOSTS is empty; export events will be dead-lettered");
    }

    let state = AppState {
        db,
        http,
        config: Arc::new(config),
    };

    tokio::spawn(run_outbox_dispatcher(state.clone()));
    tokio::spawn(run_notification_sweep(state.clone()));
    tokio::spawn(run_stuck_webhook_watchdog(state.clone()));

    let addr = format!("0.0.0.0:{}", state.config.billing_port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("billing service listening on {addr}");
    axum::serve(listener, router).await.expect("server error");
}
