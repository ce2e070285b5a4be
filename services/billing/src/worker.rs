//! Background polling loops. Each tick does one bounded batch; errors are logged and the
//! loop carries on at the next tick.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};

use crate::state::AppState;
use crate::usecase::dispatch::ProcessOutboxUseCase;
use crate::usecase::notification::RetryNotificationsUseCase;
use crate::usecase::webhook::ListStuckWebhooksUseCase;

const STUCK_WEBHOOK_SCAN_LIMIT: u64 = 100;

/// Outbox dispatcher: deliver due events every `OUTBOX_POLL_INTERVAL_MS`.
pub async fn run_outbox_dispatcher(state: AppState) {
    let usecase = ProcessOutboxUseCase {
        outbox: state.outbox_repo(),
        adapter: state.delivery_router(),
        policy: state.config.outbox_policy,
    };
    let batch_size = state.config.outbox_batch_size;
    let mut ticker = interval(Duration::from_millis(state.config.outbox_poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match usecase.execute(batch_size).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => tracing::info!(
                sent = report.sent,
                dead = report.dead,
                pending = report.pending,
                "outbox tick"
            ),
            Err(e) => tracing::error!(error = %e, "outbox dispatcher tick failed"),
        }
    }
}

/// Notification retry sweep: resend due `pending` records.
pub async fn run_notification_sweep(state: AppState) {
    let usecase = RetryNotificationsUseCase {
        notifications: state.notification_repo(),
        channel: state.email_channel(),
        policy: state.config.notification_policy,
    };
    let batch_size = state.config.notification_batch_size;
    let mut ticker = interval(Duration::from_millis(
        state.config.notification_sweep_interval_ms,
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match usecase.execute(batch_size).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => tracing::info!(
                sent = report.sent,
                retried = report.retried,
                dead = report.dead,
                "notification sweep"
            ),
            Err(e) => tracing::error!(error = %e, "notification sweep failed"),
        }
    }
}

/// Alarms on inbound webhooks left in `processing`. Read-only.
pub async fn run_stuck_webhook_watchdog(state: AppState) {
    let usecase = ListStuckWebhooksUseCase {
        ledger: state.ledger_repo(),
        ttl: chrono::Duration::seconds(state.config.stuck_webhook_ttl_secs),
    };
    let mut ticker = interval(Duration::from_secs(state.config.watchdog_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match usecase.execute(STUCK_WEBHOOK_SCAN_LIMIT).await {
            Ok(stuck) => {
                for row in &stuck {
                    tracing::error!(
                        alarm = "stuck_webhook",
                        event_id = %row.event_id,
                        event_type = %row.event_type,
                        updated_at = %row.updated_at,
                        "inbound webhook stuck in processing"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "stuck webhook scan failed"),
        }
    }
}
