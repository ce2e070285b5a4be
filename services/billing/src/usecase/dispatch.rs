use chrono::{DateTime, Utc};
use url::Url;

use crate::domain::policy::DeliveryPolicy;
use crate::domain::repository::{
    DeliveryAdapter, EmailChannel, NotificationRepository, OutboxBatch, OutboxRepository,
    WebhookChannel,
};
use crate::domain::types::{
    ExportDeadLetter, HttpDeliveryPayload, Notification, OutboundRequest, OutboxEvent, OutboxKind,
};
use crate::error::{BillingServiceError, DeliveryError};
use crate::usecase::notification::AttemptSendUseCase;

/// Counts for one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub sent: usize,
    pub dead: usize,
    /// Rescheduled as `retry`.
    pub pending: usize,
}

impl ProcessReport {
    pub fn is_empty(&self) -> bool {
        self.sent == 0 && self.dead == 0 && self.pending == 0
    }
}

/// One dispatcher tick: lock due events, deliver each, commit all outcomes together.
pub struct ProcessOutboxUseCase<R, A>
where
    R: OutboxRepository,
    A: DeliveryAdapter,
{
    pub outbox: R,
    pub adapter: A,
    pub policy: DeliveryPolicy,
}

impl<R, A> ProcessOutboxUseCase<R, A>
where
    R: OutboxRepository,
    A: DeliveryAdapter,
{
    pub async fn execute(&self, batch_limit: u64) -> Result<ProcessReport, BillingServiceError> {
        self.execute_at(Utc::now(), batch_limit).await
    }

    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        batch_limit: u64,
    ) -> Result<ProcessReport, BillingServiceError> {
        let mut batch = self.outbox.begin_batch().await?;
        let due = batch.lock_due(now, batch_limit).await?;
        let mut report = ProcessReport::default();

        for mut event in due {
            event.attempts += 1;
            let outcome = match event.kind() {
                Ok(kind) => self.adapter.deliver(kind, &event).await,
                Err(e) => Err(DeliveryError::Permanent(e.to_string())),
            };

            match outcome {
                Ok(()) => {
                    event.mark_sent(now);
                    report.sent += 1;
                }
                Err(e) if e.is_permanent() || self.policy.is_exhausted(event.attempts) => {
                    tracing::warn!(
                        outbox_event_id = %event.id,
                        kind = %event.kind,
                        attempts = event.attempts,
                        error = %e,
                        "outbox event dead-lettered"
                    );
                    event.mark_dead(e.to_string(), now);
                    if event.kind == OutboxKind::Export.as_str() {
                        batch
                            .record_export_dead_letter(&ExportDeadLetter::for_event(&event, now))
                            .await?;
                    }
                    report.dead += 1;
                }
                Err(e) => {
                    let next = self.policy.next_attempt_at(now, event.attempts);
                    tracing::debug!(
                        outbox_event_id = %event.id,
                        attempts = event.attempts,
                        next_attempt_at = %next,
                        error = %e,
                        "outbox delivery failed, rescheduled"
                    );
                    event.mark_retry(e.to_string(), next, now);
                    report.pending += 1;
                }
            }
            batch.save(&event).await?;
        }

        batch.commit().await?;
        Ok(report)
    }
}

/// Routes outbox events to the email, webhook and export channels.
pub struct OutboxDeliveryRouter<N, E, W>
where
    N: NotificationRepository,
    E: EmailChannel,
    W: WebhookChannel,
{
    pub email: AttemptSendUseCase<N, E>,
    pub webhook: W,
    /// Lowercased hosts export targets may use. Empty denies every export.
    pub export_allowed_hosts: Vec<String>,
}

impl<N, E, W> OutboxDeliveryRouter<N, E, W>
where
    N: NotificationRepository,
    E: EmailChannel,
    W: WebhookChannel,
{
    async fn deliver_email(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        let notification: Notification = serde_json::from_value(event.payload.clone())
            .map_err(|e| DeliveryError::Permanent(format!("invalid email payload: {e}")))?;
        // Once the notification layer has the email (sent, duplicate, or scheduled for its
        // own retry) the outbox is done with it.
        self.email
            .execute_in_bucket(&notification, event.created_at, Utc::now())
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Transient(format!("notification layer: {e}")))
    }

    async fn deliver_http(&self, event: &OutboxEvent, export: bool) -> Result<(), DeliveryError> {
        let payload: HttpDeliveryPayload = serde_json::from_value(event.payload.clone())
            .map_err(|e| DeliveryError::Permanent(format!("invalid {} payload: {e}", event.kind)))?;
        if export {
            check_export_target(&payload.url, &self.export_allowed_hosts)?;
        }
        let request = OutboundRequest {
            url: payload.url,
            event_type: payload.event_type,
            body: payload.body,
            idempotency_key: event.dedupe_key.clone(),
        };
        self.webhook.post(&request).await
    }
}

impl<N, E, W> DeliveryAdapter for OutboxDeliveryRouter<N, E, W>
where
    N: NotificationRepository,
    E: EmailChannel,
    W: WebhookChannel,
{
    async fn deliver(&self, kind: OutboxKind, event: &OutboxEvent) -> Result<(), DeliveryError> {
        match kind {
            OutboxKind::Email => self.deliver_email(event).await,
            OutboxKind::Webhook => self.deliver_http(event, false).await,
            OutboxKind::Export => self.deliver_http(event, true).await,
        }
    }
}

/// Export targets must be http(s) URLs whose host is on the allowlist.
pub fn check_export_target(target: &str, allowed_hosts: &[String]) -> Result<(), DeliveryError> {
    let url = Url::parse(target)
        .map_err(|e| DeliveryError::Permanent(format!("invalid export url: {e}")))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(DeliveryError::Permanent(format!(
            "export scheme '{}' not allowed",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| DeliveryError::Permanent("export url has no host".to_owned()))?;
    if allowed_hosts.iter().any(|allowed| *allowed == host) {
        Ok(())
    } else {
        Err(DeliveryError::Permanent(format!(
            "export host '{host}' not allowed"
        )))
    }
}
