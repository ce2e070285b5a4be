use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use ledgerline_domain::id::OrgId;

use crate::domain::types::{NewOutboxEvent, OutboxEvent, OutboxKind};
use crate::error::BillingServiceError;
use crate::state::AppState;
use crate::usecase::outbox::EnqueueOutboxUseCase;

// ── POST /internal/outbox ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnqueueOutboxRequest {
    pub org_id: OrgId,
    pub kind: OutboxKind,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
}

/// Returns the stored row, which is the earlier one when the dedupe key was already used.
pub async fn enqueue_outbox_event(
    State(state): State<AppState>,
    Json(body): Json<EnqueueOutboxRequest>,
) -> Result<(StatusCode, Json<OutboxEvent>), BillingServiceError> {
    let usecase = EnqueueOutboxUseCase {
        outbox: state.outbox_repo(),
    };
    let event = usecase
        .execute(NewOutboxEvent {
            org_id: body.org_id,
            kind: body.kind,
            payload: body.payload,
            dedupe_key: body.dedupe_key,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}
