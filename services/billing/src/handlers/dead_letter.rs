use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use ledgerline_domain::id::OrgId;
use ledgerline_domain::pagination::PageRequest;

use crate::domain::types::{InboundWebhookEvent, NotificationRecord, OutboxEvent};
use crate::error::BillingServiceError;
use crate::state::AppState;
use crate::usecase::notification::{ListNotificationDeadLettersUseCase, ReplayNotificationUseCase};
use crate::usecase::outbox::{ListOutboxDeadLettersUseCase, ReplayOutboxUseCase};
use crate::usecase::webhook::ListStuckWebhooksUseCase;

const STUCK_WEBHOOK_LIST_LIMIT: u64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(rename = "per-page")]
    pub per_page: Option<u32>,
    pub page: Option<u32>,
    #[serde(rename = "org-id")]
    pub org_id: Option<OrgId>,
}

impl DeadLetterQuery {
    fn page_request(&self) -> PageRequest {
        let default = PageRequest::default();
        PageRequest::new(
            self.per_page.unwrap_or(default.per_page),
            self.page.unwrap_or(default.page),
        )
    }
}

// ── GET /admin/dead-letters/outbox ────────────────────────────────────────────

pub async fn list_outbox_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<OutboxEvent>>, BillingServiceError> {
    let usecase = ListOutboxDeadLettersUseCase {
        outbox: state.outbox_repo(),
    };
    let events = usecase.execute(query.org_id, query.page_request()).await?;
    Ok(Json(events))
}

// ── POST /admin/dead-letters/outbox/{id}/replay ───────────────────────────────

pub async fn replay_outbox_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutboxEvent>, BillingServiceError> {
    let usecase = ReplayOutboxUseCase {
        outbox: state.outbox_repo(),
    };
    Ok(Json(usecase.execute(id).await?))
}

// ── GET /admin/dead-letters/notifications ─────────────────────────────────────

pub async fn list_notification_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<NotificationRecord>>, BillingServiceError> {
    let usecase = ListNotificationDeadLettersUseCase {
        notifications: state.notification_repo(),
    };
    let records = usecase.execute(query.org_id, query.page_request()).await?;
    Ok(Json(records))
}

// ── POST /admin/dead-letters/notifications/{id}/replay ────────────────────────

pub async fn replay_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRecord>, BillingServiceError> {
    let usecase = ReplayNotificationUseCase {
        notifications: state.notification_repo(),
    };
    Ok(Json(usecase.execute(id).await?))
}

// ── GET /admin/webhooks/stuck ─────────────────────────────────────────────────

pub async fn list_stuck_webhooks(
    State(state): State<AppState>,
) -> Result<Json<Vec<InboundWebhookEvent>>, BillingServiceError> {
    let usecase = ListStuckWebhooksUseCase {
        ledger: state.ledger_repo(),
        ttl: chrono::Duration::seconds(state.config.stuck_webhook_ttl_secs),
    };
    Ok(Json(usecase.execute(STUCK_WEBHOOK_LIST_LIMIT).await?))
}
