#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ledgerline_domain::id::OrgId;
use ledgerline_domain::pagination::PageRequest;

use crate::domain::types::{
    BillableAggregate, EmailMessage, ExportDeadLetter, InboundClaim, InboundWebhookEvent,
    NewOutboxEvent, NotificationRecord, OutboundRequest, OutboxEvent, OutboxKind, Payment,
    PaymentTarget, SettlementStatus, WebhookReceipt, WebhookStatus,
};
use crate::error::{BillingServiceError, DeliveryError};

// ── Outbox ───────────────────────────────────────────────────────────────────

/// Durable outbox store.
pub trait OutboxRepository: Send + Sync {
    type Batch: OutboxBatch;

    /// Insert a pending row, or return the existing row for `(org_id, dedupe_key)` unchanged.
    async fn enqueue(
        &self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError>;

    /// Open the transaction one dispatcher tick works in.
    async fn begin_batch(&self) -> Result<Self::Batch, BillingServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, BillingServiceError>;

    async fn list_dead(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError>;

    /// `dead` → `pending` with attempts reset. Returns `false` if no dead row has this id.
    async fn revive_dead(&self, id: Uuid, now: DateTime<Utc>)
    -> Result<bool, BillingServiceError>;
}

/// One dispatcher transaction. Dropping it without `commit` discards every change.
pub trait OutboxBatch: Send {
    /// Due `pending`/`retry` rows, oldest first, locked against other dispatchers.
    async fn lock_due(
        &mut self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError>;

    async fn save(&mut self, event: &OutboxEvent) -> Result<(), BillingServiceError>;

    async fn record_export_dead_letter(
        &mut self,
        letter: &ExportDeadLetter,
    ) -> Result<(), BillingServiceError>;

    async fn commit(self) -> Result<(), BillingServiceError>;
}

// ── Ledger (inbound webhooks, payments, aggregates) ──────────────────────────

pub trait LedgerRepository: Send + Sync {
    type Tx: LedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx, BillingServiceError>;

    /// Upsert the inbound row as `error` outside the rolled-back ingestion transaction.
    async fn record_failure(
        &self,
        receipt: &WebhookReceipt,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError>;

    /// Inbound rows still `processing` whose last transition is older than `stale_before`.
    async fn list_stuck(
        &self,
        stale_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<InboundWebhookEvent>, BillingServiceError>;
}

/// The transaction a single webhook delivery is reconciled in.
pub trait LedgerTransaction: Send {
    /// Lock the inbound row for `receipt.event_id`, creating it as `processing` if absent.
    async fn claim_inbound(
        &mut self,
        receipt: &WebhookReceipt,
        now: DateTime<Utc>,
    ) -> Result<InboundClaim, BillingServiceError>;

    async fn set_inbound_status(
        &mut self,
        event_id: &str,
        status: WebhookStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError>;

    /// `SELECT ... FOR UPDATE` on the invoice or booking.
    async fn lock_aggregate(
        &mut self,
        target: &PaymentTarget,
    ) -> Result<Option<BillableAggregate>, BillingServiceError>;

    async fn find_payment_by_provider_ref(
        &mut self,
        provider: &str,
        provider_ref: &str,
    ) -> Result<Option<Payment>, BillingServiceError>;

    async fn find_payment_by_checkout_session(
        &mut self,
        target: &PaymentTarget,
        checkout_session_id: &str,
    ) -> Result<Option<Payment>, BillingServiceError>;

    /// Insert unless a uniqueness constraint already covers this charge.
    /// Returns `false` on conflict; the transaction stays usable.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool, BillingServiceError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), BillingServiceError>;

    async fn list_payments(
        &mut self,
        target: &PaymentTarget,
    ) -> Result<Vec<Payment>, BillingServiceError>;

    async fn set_aggregate_status(
        &mut self,
        target: &PaymentTarget,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError>;

    /// Same contract as [`OutboxRepository::enqueue`], inside this transaction.
    async fn enqueue_outbox(
        &mut self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError>;

    async fn commit(self) -> Result<(), BillingServiceError>;

    async fn rollback(self) -> Result<(), BillingServiceError>;
}

// ── Notifications ────────────────────────────────────────────────────────────

pub trait NotificationRepository: Send + Sync {
    async fn find_by_key(
        &self,
        org_id: OrgId,
        dedupe_key: &str,
    ) -> Result<Option<NotificationRecord>, BillingServiceError>;

    async fn find_by_id(&self, id: Uuid)
    -> Result<Option<NotificationRecord>, BillingServiceError>;

    /// Returns `false` if a record with the same `(org_id, dedupe_key)` already exists.
    async fn insert(&self, record: &NotificationRecord) -> Result<bool, BillingServiceError>;

    async fn save(&self, record: &NotificationRecord) -> Result<(), BillingServiceError>;

    /// Due `pending` records, leased by pushing `next_retry_at` to `lease_until` so a
    /// concurrent sweep skips them.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError>;

    async fn list_dead(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError>;

    async fn revive_dead(&self, id: Uuid, now: DateTime<Utc>)
    -> Result<bool, BillingServiceError>;
}

// ── Channels ─────────────────────────────────────────────────────────────────

pub trait EmailChannel: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

pub trait WebhookChannel: Send + Sync {
    async fn post(&self, request: &OutboundRequest) -> Result<(), DeliveryError>;
}

/// Kind-specific delivery of one outbox event.
pub trait DeliveryAdapter: Send + Sync {
    async fn deliver(&self, kind: OutboxKind, event: &OutboxEvent) -> Result<(), DeliveryError>;
}
