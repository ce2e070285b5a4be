use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use ledgerline_billing::domain::policy::DeliveryPolicy;
use ledgerline_billing::domain::provider_event::{EventEnvelope, ProviderEvent};
use ledgerline_billing::domain::repository::{
    EmailChannel, LedgerRepository, LedgerTransaction, NotificationRepository, OutboxBatch,
    OutboxRepository, WebhookChannel,
};
use ledgerline_billing::domain::types::{
    BillableAggregate, EmailMessage, ExportDeadLetter, InboundClaim, InboundWebhookEvent,
    NewOutboxEvent, NotificationRecord, NotificationStatus, OutboundRequest, OutboxEvent,
    OutboxStatus, Payment, PaymentTarget, SettlementStatus, WebhookReceipt, WebhookStatus,
};
use ledgerline_billing::error::{BillingServiceError, DeliveryError};
use ledgerline_billing::signature::StripeSignatureVerifier;
use ledgerline_domain::id::{BookingId, InvoiceId, OrgId};
use ledgerline_domain::pagination::PageRequest;
use ledgerline_testing::stripe::{TEST_WEBHOOK_SECRET, signed_header};

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
}

pub fn org() -> OrgId {
    OrgId(Uuid::from_u128(0x0199_f000_0000_7000_8000_0000_0000_0001))
}

pub fn other_org() -> OrgId {
    OrgId(Uuid::from_u128(0x0199_f000_0000_7000_8000_0000_0000_0002))
}

pub fn invoice(id: &str, total_cents: i64) -> BillableAggregate {
    BillableAggregate {
        target: PaymentTarget::Invoice(InvoiceId::from(id)),
        org_id: org(),
        customer_email: "client@example.com".to_owned(),
        owed_cents: total_cents,
        currency: "USD".to_owned(),
        status: SettlementStatus::Pending,
    }
}

pub fn booking(id: &str, deposit_cents: i64) -> BillableAggregate {
    BillableAggregate {
        target: PaymentTarget::Booking(BookingId::from(id)),
        ..invoice("unused", deposit_cents)
    }
}

pub fn invoice_target(id: &str) -> PaymentTarget {
    PaymentTarget::Invoice(InvoiceId::from(id))
}

pub fn verifier() -> StripeSignatureVerifier {
    StripeSignatureVerifier::new(TEST_WEBHOOK_SECRET, 300)
}

/// `Stripe-Signature` for `payload`, signed at `at`.
pub fn sign(payload: &[u8], at: DateTime<Utc>) -> String {
    signed_header(TEST_WEBHOOK_SECRET, payload, at.timestamp())
}

pub fn provider_event(envelope: serde_json::Value) -> ProviderEvent {
    let envelope: EventEnvelope = serde_json::from_value(envelope).unwrap();
    ProviderEvent::from_envelope(&envelope)
}

/// `payment_intent.<kind>` event for an invoice. As the provider does, only a
/// `succeeded` intent reports the amount as received.
pub fn intent_event(
    event_id: &str,
    kind: &str,
    intent_id: &str,
    invoice_id: &str,
    amount: i64,
) -> serde_json::Value {
    let amount_received = if kind == "succeeded" { amount } else { 0 };
    serde_json::json!({
        "id": event_id,
        "type": format!("payment_intent.{kind}"),
        "created": now().timestamp(),
        "data": {
            "object": {
                "id": intent_id,
                "amount": amount,
                "amount_received": amount_received,
                "currency": "usd",
                "metadata": { "invoice_id": invoice_id }
            }
        }
    })
}

pub fn fast_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        max_attempts: 3,
        base_backoff_secs: 30,
    }
}

// ── MemoryLedger ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub inbound: HashMap<String, InboundWebhookEvent>,
    pub aggregates: HashMap<PaymentTarget, BillableAggregate>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Default)]
pub struct OutboxState {
    pub events: Vec<OutboxEvent>,
    pub export_dead_letters: Vec<ExportDeadLetter>,
}

/// In-memory ledger. A transaction holds the whole ledger lock until commit or drop, which
/// is at least as strict as the row locks the database takes.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    pub state: Arc<AsyncMutex<LedgerState>>,
    pub outbox: Arc<AsyncMutex<OutboxState>>,
    /// Makes `list_payments` fail, aborting reconciliation midway.
    pub fail_reconcile: Arc<AtomicBool>,
    /// Payment lookups miss until the next insert, as if another transaction
    /// inserted the same charge between lookup and insert.
    pub simulate_lookup_race: Arc<AtomicBool>,
}

impl MemoryLedger {
    pub fn with_aggregates(aggregates: Vec<BillableAggregate>) -> Self {
        let ledger = Self::default();
        {
            let mut state = ledger.state.try_lock().unwrap();
            for aggregate in aggregates {
                state.aggregates.insert(aggregate.target.clone(), aggregate);
            }
        }
        ledger
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }

    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.outbox.lock().await.events.clone()
    }

    pub async fn seed_inbound(&self, event: InboundWebhookEvent) {
        self.state
            .lock()
            .await
            .inbound
            .insert(event.event_id.clone(), event);
    }

    pub async fn seed_payment(&self, payment: Payment) {
        self.state.lock().await.payments.push(payment);
    }
}

impl LedgerRepository for MemoryLedger {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<MemoryLedgerTx, BillingServiceError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryLedgerTx {
            guard,
            working,
            outbox: Arc::clone(&self.outbox),
            pending_outbox: Vec::new(),
            fail_reconcile: Arc::clone(&self.fail_reconcile),
            simulate_lookup_race: Arc::clone(&self.simulate_lookup_race),
        })
    }

    async fn record_failure(
        &self,
        receipt: &WebhookReceipt,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError> {
        let mut state = self.state.lock().await;
        let row = state
            .inbound
            .entry(receipt.event_id.clone())
            .or_insert_with(|| receipt.to_event(WebhookStatus::Error, now));
        if matches!(row.status, WebhookStatus::Succeeded | WebhookStatus::Ignored) {
            return Ok(());
        }
        row.status = WebhookStatus::Error;
        row.last_error = Some(error.to_owned());
        row.updated_at = now;
        Ok(())
    }

    async fn list_stuck(
        &self,
        stale_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<InboundWebhookEvent>, BillingServiceError> {
        let state = self.state.lock().await;
        let mut stuck: Vec<_> = state
            .inbound
            .values()
            .filter(|e| e.status == WebhookStatus::Processing && e.updated_at < stale_before)
            .cloned()
            .collect();
        stuck.sort_by_key(|e| e.updated_at);
        stuck.truncate(limit as usize);
        Ok(stuck)
    }
}

pub struct MemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    outbox: Arc<AsyncMutex<OutboxState>>,
    pending_outbox: Vec<OutboxEvent>,
    fail_reconcile: Arc<AtomicBool>,
    simulate_lookup_race: Arc<AtomicBool>,
}

impl MemoryLedgerTx {
    fn lookups_hidden(&self) -> bool {
        self.simulate_lookup_race.load(Ordering::SeqCst)
    }
}

impl LedgerTransaction for MemoryLedgerTx {
    async fn claim_inbound(
        &mut self,
        receipt: &WebhookReceipt,
        now: DateTime<Utc>,
    ) -> Result<InboundClaim, BillingServiceError> {
        if let Some(existing) = self.working.inbound.get(&receipt.event_id) {
            return Ok(InboundClaim::Existing(existing.clone()));
        }
        self.working.inbound.insert(
            receipt.event_id.clone(),
            receipt.to_event(WebhookStatus::Processing, now),
        );
        Ok(InboundClaim::Fresh)
    }

    async fn set_inbound_status(
        &mut self,
        event_id: &str,
        status: WebhookStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError> {
        let row = self
            .working
            .inbound
            .get_mut(event_id)
            .ok_or_else(|| anyhow::anyhow!("no inbound row {event_id}"))?;
        row.status = status;
        row.last_error = error.map(str::to_owned);
        row.updated_at = now;
        Ok(())
    }

    async fn lock_aggregate(
        &mut self,
        target: &PaymentTarget,
    ) -> Result<Option<BillableAggregate>, BillingServiceError> {
        Ok(self.working.aggregates.get(target).cloned())
    }

    async fn find_payment_by_provider_ref(
        &mut self,
        provider: &str,
        provider_ref: &str,
    ) -> Result<Option<Payment>, BillingServiceError> {
        if self.lookups_hidden() {
            return Ok(None);
        }
        Ok(self
            .working
            .payments
            .iter()
            .find(|p| p.provider == provider && p.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn find_payment_by_checkout_session(
        &mut self,
        target: &PaymentTarget,
        checkout_session_id: &str,
    ) -> Result<Option<Payment>, BillingServiceError> {
        if self.lookups_hidden() {
            return Ok(None);
        }
        Ok(self
            .working
            .payments
            .iter()
            .find(|p| {
                p.target == *target
                    && p.checkout_session_id.as_deref() == Some(checkout_session_id)
            })
            .cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool, BillingServiceError> {
        self.simulate_lookup_race.store(false, Ordering::SeqCst);
        let conflict = self.working.payments.iter().any(|p| {
            let same_ref = p.provider == payment.provider
                && p.provider_ref.is_some()
                && p.provider_ref == payment.provider_ref;
            let same_session = p.target == payment.target
                && p.checkout_session_id.is_some()
                && p.checkout_session_id == payment.checkout_session_id;
            same_ref || same_session
        });
        if conflict {
            return Ok(false);
        }
        self.working.payments.push(payment.clone());
        Ok(true)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), BillingServiceError> {
        let row = self
            .working
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| anyhow::anyhow!("no payment {}", payment.id))?;
        *row = payment.clone();
        Ok(())
    }

    async fn list_payments(
        &mut self,
        target: &PaymentTarget,
    ) -> Result<Vec<Payment>, BillingServiceError> {
        if self.fail_reconcile.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection reset while listing payments").into());
        }
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.target == *target)
            .cloned()
            .collect())
    }

    async fn set_aggregate_status(
        &mut self,
        target: &PaymentTarget,
        status: SettlementStatus,
        _now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError> {
        if let Some(aggregate) = self.working.aggregates.get_mut(target) {
            aggregate.status = status;
        }
        Ok(())
    }

    async fn enqueue_outbox(
        &mut self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError> {
        let same_key =
            |e: &&OutboxEvent| e.org_id == event.org_id && e.dedupe_key == event.dedupe_key;
        if let Some(existing) = self.pending_outbox.iter().find(same_key) {
            return Ok(existing.clone());
        }
        if let Some(existing) = self.outbox.lock().await.events.iter().find(same_key) {
            return Ok(existing.clone());
        }
        let row = event.clone().into_event(now);
        self.pending_outbox.push(row.clone());
        Ok(row)
    }

    async fn commit(self) -> Result<(), BillingServiceError> {
        let MemoryLedgerTx {
            mut guard,
            working,
            outbox,
            pending_outbox,
            ..
        } = self;
        let mut outbox = outbox.lock().await;
        for row in pending_outbox {
            let exists = outbox
                .events
                .iter()
                .any(|e| e.org_id == row.org_id && e.dedupe_key == row.dedupe_key);
            if !exists {
                outbox.events.push(row);
            }
        }
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), BillingServiceError> {
        Ok(())
    }
}

// ── MemoryOutbox ─────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryOutbox {
    pub state: Arc<AsyncMutex<OutboxState>>,
}

impl MemoryOutbox {
    pub async fn events(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.events.clone()
    }

    pub async fn event(&self, id: Uuid) -> OutboxEvent {
        self.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn export_dead_letters(&self) -> Vec<ExportDeadLetter> {
        self.state.lock().await.export_dead_letters.clone()
    }

    pub async fn seed(&self, event: OutboxEvent) {
        self.state.lock().await.events.push(event);
    }
}

impl OutboxRepository for MemoryOutbox {
    type Batch = MemoryOutboxBatch;

    async fn enqueue(
        &self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .events
            .iter()
            .find(|e| e.org_id == event.org_id && e.dedupe_key == event.dedupe_key)
        {
            return Ok(existing.clone());
        }
        let row = event.clone().into_event(now);
        state.events.push(row.clone());
        Ok(row)
    }

    async fn begin_batch(&self) -> Result<MemoryOutboxBatch, BillingServiceError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryOutboxBatch { guard, working })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, BillingServiceError> {
        let state = self.state.lock().await;
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_dead(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError> {
        let state = self.state.lock().await;
        let mut dead: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Dead)
            .filter(|e| org_id.is_none_or(|org| e.org_id == org))
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(dead
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn revive_dead(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingServiceError> {
        let mut state = self.state.lock().await;
        match state
            .events
            .iter_mut()
            .find(|e| e.id == id && e.status == OutboxStatus::Dead)
        {
            Some(event) => {
                event.status = OutboxStatus::Pending;
                event.attempts = 0;
                event.next_attempt_at = Some(now);
                event.last_error = None;
                event.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub struct MemoryOutboxBatch {
    guard: OwnedMutexGuard<OutboxState>,
    working: OutboxState,
}

impl OutboxBatch for MemoryOutboxBatch {
    async fn lock_due(
        &mut self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError> {
        let mut due: Vec<_> = self
            .working
            .events
            .iter()
            .filter(|e| matches!(e.status, OutboxStatus::Pending | OutboxStatus::Retry))
            .filter(|e| e.next_attempt_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn save(&mut self, event: &OutboxEvent) -> Result<(), BillingServiceError> {
        let row = self
            .working
            .events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| anyhow::anyhow!("no outbox event {}", event.id))?;
        *row = event.clone();
        Ok(())
    }

    async fn record_export_dead_letter(
        &mut self,
        letter: &ExportDeadLetter,
    ) -> Result<(), BillingServiceError> {
        self.working
            .export_dead_letters
            .retain(|l| l.outbox_event_id != letter.outbox_event_id);
        self.working.export_dead_letters.push(letter.clone());
        Ok(())
    }

    async fn commit(self) -> Result<(), BillingServiceError> {
        let MemoryOutboxBatch { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

// ── MemoryNotifications ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryNotifications {
    pub records: Arc<Mutex<Vec<NotificationRecord>>>,
}

impl MemoryNotifications {
    pub fn all(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn by_key(&self, dedupe_key: &str) -> NotificationRecord {
        self.all()
            .into_iter()
            .find(|r| r.dedupe_key == dedupe_key)
            .unwrap()
    }
}

impl NotificationRepository for MemoryNotifications {
    async fn find_by_key(
        &self,
        org_id: OrgId,
        dedupe_key: &str,
    ) -> Result<Option<NotificationRecord>, BillingServiceError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.org_id == org_id && r.dedupe_key == dedupe_key)
            .cloned())
    }

    async fn find_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<NotificationRecord>, BillingServiceError> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, record: &NotificationRecord) -> Result<bool, BillingServiceError> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.org_id == record.org_id && r.dedupe_key == record.dedupe_key)
        {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn save(&self, record: &NotificationRecord) -> Result<(), BillingServiceError> {
        let mut records = self.records.lock().unwrap();
        let row = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| anyhow::anyhow!("no notification {}", record.id))?;
        *row = record.clone();
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError> {
        let mut records = self.records.lock().unwrap();
        let mut claimed = Vec::new();
        for record in records.iter_mut() {
            if claimed.len() as u64 >= limit {
                break;
            }
            let due = record.status == NotificationStatus::Pending
                && record.next_retry_at.is_some_and(|at| at <= now);
            if due {
                record.next_retry_at = Some(lease_until);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn list_dead(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.status == NotificationStatus::Dead)
            .filter(|r| org_id.is_none_or(|org| r.org_id == org))
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect())
    }

    async fn revive_dead(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingServiceError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == NotificationStatus::Dead)
        {
            Some(record) => {
                record.status = NotificationStatus::Pending;
                record.attempt_count = 0;
                record.next_retry_at = Some(now);
                record.last_error = None;
                record.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ── Channels ─────────────────────────────────────────────────────────────────

/// Scripted outcomes: queued failures are returned first, then `fallback` (success if unset).
#[derive(Clone, Default)]
pub struct Script {
    failures: Arc<Mutex<VecDeque<DeliveryError>>>,
    fallback: Arc<Mutex<Option<DeliveryError>>>,
}

impl Script {
    pub fn fail_next(&self, error: DeliveryError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn fail_always(&self, error: DeliveryError) {
        *self.fallback.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        self.failures.lock().unwrap().clear();
        *self.fallback.lock().unwrap() = None;
    }

    fn next(&self) -> Result<(), DeliveryError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        match self.fallback.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MockEmailChannel {
    pub script: Script,
    /// Every message the channel accepted.
    pub sent: Arc<Mutex<Vec<EmailMessage>>>,
}

impl MockEmailChannel {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl EmailChannel for MockEmailChannel {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        self.script.next()?;
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockWebhookChannel {
    pub script: Script,
    /// Every request the channel attempted, successful or not.
    pub requests: Arc<Mutex<Vec<OutboundRequest>>>,
}

impl MockWebhookChannel {
    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl WebhookChannel for MockWebhookChannel {
    async fn post(&self, request: &OutboundRequest) -> Result<(), DeliveryError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script.next()
    }
}
