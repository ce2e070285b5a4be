use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledgerline_core::serde::{to_rfc3339_ms, to_rfc3339_ms_opt};
use ledgerline_domain::id::{BookingId, InvoiceId, OrgId};

/// Payment provider name recorded on inbound events and payments.
pub const STRIPE_PROVIDER: &str = "stripe";

/// How long a notification claimed by the sweep stays invisible to other sweepers.
pub const NOTIFICATION_CLAIM_LEASE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $label,
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ── Outbox ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxKind {
    Email,
    Webhook,
    Export,
}

string_enum!(OutboxKind, "outbox kind" {
    Email => "email",
    Webhook => "webhook",
    Export => "export",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Retry,
    Sent,
    Dead,
}

string_enum!(OutboxStatus, "outbox status" {
    Pending => "pending",
    Retry => "retry",
    Sent => "sent",
    Dead => "dead",
});

/// One pending side effect. `kind` stays the stored string so rows written by a newer
/// producer with a kind this build does not know can still be dead-lettered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub org_id: OrgId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    #[serde(serialize_with = "to_rfc3339_ms_opt")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub updated_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn kind(&self) -> Result<OutboxKind, UnknownVariant> {
        self.kind.parse()
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Sent;
        self.next_attempt_at = None;
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.status = OutboxStatus::Dead;
        self.next_attempt_at = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    pub fn mark_retry(
        &mut self,
        error: String,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = OutboxStatus::Retry;
        self.next_attempt_at = Some(next_attempt_at);
        self.last_error = Some(error);
        self.updated_at = now;
    }
}

/// Producer request to enqueue a side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub org_id: OrgId,
    pub kind: OutboxKind,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
}

impl NewOutboxEvent {
    /// The row as first persisted: pending and due immediately.
    pub fn into_event(self, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            id: Uuid::now_v7(),
            org_id: self.org_id,
            kind: self.kind.as_str().to_owned(),
            payload: self.payload,
            dedupe_key: self.dedupe_key,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: Some(now),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Operator audit row for a dead-lettered export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDeadLetter {
    pub id: Uuid,
    pub outbox_event_id: Uuid,
    pub org_id: OrgId,
    pub target_url: Option<String>,
    pub last_error: Option<String>,
    pub attempts: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ExportDeadLetter {
    pub fn for_event(event: &OutboxEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            outbox_event_id: event.id,
            org_id: event.org_id,
            target_url: event
                .payload
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            last_error: event.last_error.clone(),
            attempts: event.attempts,
            payload: event.payload.clone(),
            created_at: now,
        }
    }
}

/// Payload of `webhook` and `export` outbox events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpDeliveryPayload {
    pub url: String,
    pub event_type: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

// ── Inbound webhooks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Processing,
    Succeeded,
    Ignored,
    Error,
}

string_enum!(WebhookStatus, "webhook status" {
    Processing => "processing",
    Succeeded => "succeeded",
    Ignored => "ignored",
    Error => "error",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundWebhookEvent {
    pub event_id: String,
    pub provider: String,
    pub event_type: String,
    pub payload_hash: String,
    pub status: WebhookStatus,
    pub last_error: Option<String>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub received_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub updated_at: DateTime<Utc>,
}

/// What the gateway knows about a verified delivery before touching the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReceipt {
    pub event_id: String,
    pub provider: String,
    pub event_type: String,
    pub payload_hash: String,
}

impl WebhookReceipt {
    pub fn to_event(&self, status: WebhookStatus, now: DateTime<Utc>) -> InboundWebhookEvent {
        InboundWebhookEvent {
            event_id: self.event_id.clone(),
            provider: self.provider.clone(),
            event_type: self.event_type.clone(),
            payload_hash: self.payload_hash.clone(),
            status,
            last_error: None,
            received_at: now,
            updated_at: now,
        }
    }
}

/// Result of locking or creating the inbound row for an event id.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundClaim {
    /// First sight: a `processing` row was created by this transaction.
    Fresh,
    /// A row already existed and is now locked by this transaction.
    Existing(InboundWebhookEvent),
}

// ── Payments ─────────────────────────────────────────────────────────────────

/// The aggregate a payment is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum PaymentTarget {
    Invoice(InvoiceId),
    Booking(BookingId),
}

impl PaymentTarget {
    pub fn invoice_id(&self) -> Option<&InvoiceId> {
        match self {
            Self::Invoice(id) => Some(id),
            Self::Booking(_) => None,
        }
    }

    pub fn booking_id(&self) -> Option<&BookingId> {
        match self {
            Self::Booking(id) => Some(id),
            Self::Invoice(_) => None,
        }
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoice(id) => write!(f, "invoice:{id}"),
            Self::Booking(id) => write!(f, "booking:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

string_enum!(PaymentStatus, "payment status" {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
});

impl PaymentStatus {
    /// Provider events can arrive out of order; a settled payment is never moved back.
    pub fn can_become(&self, next: PaymentStatus) -> bool {
        match self {
            Self::Pending => true,
            Self::Failed => next != Self::Pending,
            Self::Succeeded => next == Self::Succeeded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub target: PaymentTarget,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub checkout_session_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub received_at: DateTime<Utc>,
}

/// Derived settlement state of an invoice or a booking deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Partial,
    Paid,
}

string_enum!(SettlementStatus, "settlement status" {
    Pending => "pending",
    Partial => "partial",
    Paid => "paid",
});

impl SettlementStatus {
    /// Pure function of the recorded payments: only `succeeded` ones count.
    pub fn derive(payments: &[Payment], owed_cents: i64) -> Self {
        let paid: i64 = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .map(|p| p.amount_cents)
            .sum();
        if paid > 0 && paid >= owed_cents {
            Self::Paid
        } else if paid > 0 {
            Self::Partial
        } else {
            Self::Pending
        }
    }
}

/// Invoice or booking, reduced to what reconciliation reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillableAggregate {
    pub target: PaymentTarget,
    pub org_id: OrgId,
    pub customer_email: String,
    /// Invoice total or booking deposit.
    pub owed_cents: i64,
    pub currency: String,
    pub status: SettlementStatus,
}

// ── Notifications ────────────────────────────────────────────────────────────

/// A customer-facing message. Also the payload of `email` outbox events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub org_id: OrgId,
    pub notification_type: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<InvoiceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<BookingId>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Dead,
}

string_enum!(NotificationStatus, "notification status" {
    Pending => "pending",
    Sent => "sent",
    Dead => "dead",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub org_id: OrgId,
    pub dedupe_key: String,
    pub notification: Notification,
    pub status: NotificationStatus,
    pub attempt_count: i32,
    pub max_retries: i32,
    #[serde(serialize_with = "to_rfc3339_ms_opt")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(
        notification: Notification,
        dedupe_key: String,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            org_id: notification.org_id,
            dedupe_key,
            notification,
            status: NotificationStatus::Pending,
            attempt_count: 0,
            max_retries,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One email handed to the email channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Dedupe key, forwarded so the email provider can drop our own retries.
    pub idempotency_key: String,
}

/// One HTTP POST handed to the webhook channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub url: String,
    pub event_type: String,
    pub body: serde_json::Value,
    pub idempotency_key: String,
}
