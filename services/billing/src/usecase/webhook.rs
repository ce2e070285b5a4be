use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::domain::provider_event::{EventEnvelope, ProviderEvent};
use crate::domain::repository::{LedgerRepository, LedgerTransaction};
use crate::domain::types::{
    InboundClaim, InboundWebhookEvent, STRIPE_PROVIDER, WebhookReceipt, WebhookStatus,
};
use crate::error::BillingServiceError;
use crate::signature::{StripeSignatureVerifier, payload_hash};
use crate::usecase::reconcile::{Reconciliation, reconcile};

pub struct IngestWebhookInput {
    pub payload: Bytes,
    /// Raw `Stripe-Signature` header, if present.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A payment row was inserted or changed.
    Applied,
    /// Handled, but nothing to apply (irrelevant event, duplicate charge, zero amount).
    Ignored,
    /// Same event id and payload already finished; business logic was not re-run.
    AlreadyProcessed,
    /// Another request holds this event id in `processing`.
    InFlight,
}

impl IngestOutcome {
    pub fn processed(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Exactly-once ingestion of provider webhooks.
pub struct IngestWebhookUseCase<L: LedgerRepository> {
    pub ledger: L,
    pub verifier: StripeSignatureVerifier,
}

impl<L: LedgerRepository> IngestWebhookUseCase<L> {
    pub async fn execute(
        &self,
        input: IngestWebhookInput,
    ) -> Result<IngestOutcome, BillingServiceError> {
        self.execute_at(input, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        input: IngestWebhookInput,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, BillingServiceError> {
        // 1. Signature before anything else; no state is touched on failure.
        let header = input
            .signature
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or(BillingServiceError::MissingSignature)?;
        self.verifier
            .verify(&input.payload, header, now.timestamp())
            .map_err(|e| {
                tracing::debug!(error = %e, "webhook signature rejected");
                BillingServiceError::InvalidSignature
            })?;

        // 2. Envelope
        let envelope: EventEnvelope = serde_json::from_slice(&input.payload)
            .map_err(|_| BillingServiceError::MalformedPayload)?;
        let receipt = WebhookReceipt {
            event_id: envelope.id.clone(),
            provider: STRIPE_PROVIDER.to_owned(),
            event_type: envelope.event_type.clone(),
            payload_hash: payload_hash(&input.payload),
        };

        // 3. Lock or create the inbound row
        let mut tx = self.ledger.begin().await?;
        if let InboundClaim::Existing(row) = tx.claim_inbound(&receipt, now).await? {
            if row.payload_hash != receipt.payload_hash {
                tracing::warn!(
                    security = true,
                    event_id = %receipt.event_id,
                    stored_hash = %row.payload_hash,
                    received_hash = %receipt.payload_hash,
                    "webhook payload does not match recorded event"
                );
                tx.rollback().await?;
                return Err(BillingServiceError::PayloadMismatch);
            }
            match row.status {
                WebhookStatus::Succeeded | WebhookStatus::Ignored => {
                    tx.rollback().await?;
                    return Ok(IngestOutcome::AlreadyProcessed);
                }
                WebhookStatus::Processing => {
                    tx.rollback().await?;
                    return Ok(IngestOutcome::InFlight);
                }
                WebhookStatus::Error => {
                    tx.set_inbound_status(&receipt.event_id, WebhookStatus::Processing, None, now)
                        .await?;
                }
            }
        }

        // 4. Reconcile and record the outcome in the same transaction
        let event = ProviderEvent::from_envelope(&envelope);
        match apply(&mut tx, &receipt, &event, now).await {
            Ok(outcome) => {
                tx.commit().await?;
                tracing::info!(
                    event_id = %receipt.event_id,
                    event_type = %receipt.event_type,
                    outcome = ?outcome,
                    "webhook processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "webhook transaction rollback failed");
                }
                tracing::error!(
                    event_id = %receipt.event_id,
                    event_type = %receipt.event_type,
                    error = %e,
                    "webhook reconciliation failed"
                );
                if let Err(record_err) = self
                    .ledger
                    .record_failure(&receipt, &failure_message(&e), now)
                    .await
                {
                    tracing::error!(
                        event_id = %receipt.event_id,
                        error = %record_err,
                        "failed to record webhook error status"
                    );
                }
                Err(e)
            }
        }
    }
}

async fn apply<T: LedgerTransaction>(
    tx: &mut T,
    receipt: &WebhookReceipt,
    event: &ProviderEvent,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, BillingServiceError> {
    let reconciliation = reconcile(tx, event, now).await?;
    let (status, outcome) = match reconciliation {
        Reconciliation::Applied { .. } if reconciliation.applied_payment() => {
            (WebhookStatus::Succeeded, IngestOutcome::Applied)
        }
        Reconciliation::Applied { .. } => (WebhookStatus::Succeeded, IngestOutcome::Ignored),
        Reconciliation::Ignored(reason) => {
            tracing::info!(
                event_id = %receipt.event_id,
                event_type = %receipt.event_type,
                reason = ?reason,
                "webhook ignored"
            );
            (WebhookStatus::Ignored, IngestOutcome::Ignored)
        }
    };
    tx.set_inbound_status(&receipt.event_id, status, None, now)
        .await?;
    Ok(outcome)
}

fn failure_message(error: &BillingServiceError) -> String {
    match error {
        BillingServiceError::Internal(e) => format!("{e:#}"),
        other => other.to_string(),
    }
}

/// Inbound rows left in `processing` past the TTL: the process died mid-reconciliation.
pub struct ListStuckWebhooksUseCase<L: LedgerRepository> {
    pub ledger: L,
    pub ttl: Duration,
}

impl<L: LedgerRepository> ListStuckWebhooksUseCase<L> {
    pub async fn execute(&self, limit: u64) -> Result<Vec<InboundWebhookEvent>, BillingServiceError> {
        self.execute_at(Utc::now(), limit).await
    }

    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<InboundWebhookEvent>, BillingServiceError> {
        self.ledger.list_stuck(now - self.ttl, limit).await
    }
}
