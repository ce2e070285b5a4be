use chrono::{DateTime, Utc};
use uuid::Uuid;

use ledgerline_domain::id::OrgId;
use ledgerline_domain::pagination::PageRequest;

use crate::domain::repository::OutboxRepository;
use crate::domain::types::{NewOutboxEvent, OutboxEvent};
use crate::error::BillingServiceError;

/// Producer entry point: idempotent on `(org_id, dedupe_key)`.
pub struct EnqueueOutboxUseCase<R: OutboxRepository> {
    pub outbox: R,
}

impl<R: OutboxRepository> EnqueueOutboxUseCase<R> {
    pub async fn execute(&self, event: NewOutboxEvent) -> Result<OutboxEvent, BillingServiceError> {
        self.execute_at(event, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError> {
        if event.dedupe_key.trim().is_empty() {
            return Err(BillingServiceError::MalformedPayload);
        }
        let stored = self.outbox.enqueue(&event, now).await?;
        tracing::debug!(
            outbox_event_id = %stored.id,
            kind = %stored.kind,
            dedupe_key = %stored.dedupe_key,
            "outbox event enqueued"
        );
        Ok(stored)
    }
}

pub struct ListOutboxDeadLettersUseCase<R: OutboxRepository> {
    pub outbox: R,
}

impl<R: OutboxRepository> ListOutboxDeadLettersUseCase<R> {
    pub async fn execute(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError> {
        self.outbox.list_dead(org_id, page.clamped()).await
    }
}

/// Operator recovery: put a dead event back in the queue with a fresh retry budget.
pub struct ReplayOutboxUseCase<R: OutboxRepository> {
    pub outbox: R,
}

impl<R: OutboxRepository> ReplayOutboxUseCase<R> {
    pub async fn execute(&self, id: Uuid) -> Result<OutboxEvent, BillingServiceError> {
        self.execute_at(id, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError> {
        let revived = self.outbox.revive_dead(id, now).await?;
        let event = self
            .outbox
            .find_by_id(id)
            .await?
            .ok_or(BillingServiceError::OutboxEventNotFound)?;
        if !revived {
            return Err(BillingServiceError::NotDeadLettered);
        }
        tracing::info!(outbox_event_id = %id, kind = %event.kind, "dead outbox event replayed");
        Ok(event)
    }
}
