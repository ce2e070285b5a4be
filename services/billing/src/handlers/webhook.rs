use axum::{Json, extract::State, http::HeaderMap};
use bytes::Bytes;
use serde::Serialize;

use crate::error::BillingServiceError;
use crate::signature::STRIPE_SIGNATURE_HEADER;
use crate::state::AppState;
use crate::usecase::webhook::{IngestWebhookInput, IngestWebhookUseCase};

// ── POST /webhooks/stripe ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    /// `true` only when this delivery changed a payment.
    pub processed: bool,
}

/// Takes the raw body: the signature covers the exact bytes the provider sent.
pub async fn receive_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, BillingServiceError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let usecase = IngestWebhookUseCase {
        ledger: state.ledger_repo(),
        verifier: state.signature_verifier(),
    };
    let outcome = usecase
        .execute(IngestWebhookInput {
            payload: body,
            signature,
        })
        .await?;

    Ok(Json(WebhookAck {
        received: true,
        processed: outcome.processed(),
    }))
}
