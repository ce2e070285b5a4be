//! Typed view over Stripe event envelopes.
//!
//! Only the fields reconciliation reads are modelled. Anything that fails to decode is
//! kept as [`ProviderEvent::Undecodable`] and ends up `ignored` rather than erroring.

use serde::Deserialize;

use ledgerline_domain::id::{BookingId, InvoiceId};

use crate::domain::types::{PaymentStatus, PaymentTarget};

/// `{id, type, created, data: {object}}`
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Domain identifiers the checkout creator stored in `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoutingMetadata {
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
}

impl RoutingMetadata {
    /// Invoice wins over booking; blank values count as absent.
    pub fn target(&self) -> Option<PaymentTarget> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        if let Some(id) = present(&self.invoice_id) {
            return Some(PaymentTarget::Invoice(InvoiceId(id)));
        }
        present(&self.booking_id).map(|id| PaymentTarget::Booking(BookingId(id)))
    }
}

/// A reference that is either a bare id or an expanded object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<Expandable>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<RoutingMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<RoutingMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    CheckoutSessionCompleted(CheckoutSession),
    CheckoutSessionAsyncPaymentSucceeded(CheckoutSession),
    CheckoutSessionAsyncPaymentFailed(CheckoutSession),
    PaymentIntentSucceeded(PaymentIntent),
    PaymentIntentProcessing(PaymentIntent),
    PaymentIntentPaymentFailed(PaymentIntent),
    Unsupported(String),
    Undecodable { event_type: String, reason: String },
}

/// Amount fields in the order they are trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmountFields {
    pub amount_received: Option<i64>,
    pub amount_total: Option<i64>,
    pub amount: Option<i64>,
}

impl AmountFields {
    /// First positive value of `amount_received`, `amount_total`, `amount`.
    ///
    /// Intents that have not settled report `amount_received: 0` next to the real `amount`,
    /// so zeros are skipped. A zero is only returned when no field is positive.
    pub fn resolve(&self) -> Option<i64> {
        let fields = [self.amount_received, self.amount_total, self.amount];
        fields
            .into_iter()
            .flatten()
            .find(|a| *a > 0)
            .or_else(|| fields.into_iter().flatten().next())
    }
}

/// Everything reconciliation derives from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFacts {
    pub target: Option<PaymentTarget>,
    pub amounts: AmountFields,
    pub currency: Option<String>,
    pub provider_ref: Option<String>,
    pub checkout_session_id: Option<String>,
    /// `None` when the provider reported a status we do not act on.
    pub status: Option<PaymentStatus>,
}

impl ProviderEvent {
    pub fn from_envelope(envelope: &EventEnvelope) -> Self {
        let object = &envelope.data.object;
        let event_type = envelope.event_type.as_str();
        match event_type {
            "checkout.session.completed" => {
                decode(event_type, object, Self::CheckoutSessionCompleted)
            }
            "checkout.session.async_payment_succeeded" => {
                decode(event_type, object, Self::CheckoutSessionAsyncPaymentSucceeded)
            }
            "checkout.session.async_payment_failed" => {
                decode(event_type, object, Self::CheckoutSessionAsyncPaymentFailed)
            }
            "payment_intent.succeeded" => decode(event_type, object, Self::PaymentIntentSucceeded),
            "payment_intent.processing" => {
                decode(event_type, object, Self::PaymentIntentProcessing)
            }
            "payment_intent.payment_failed" => {
                decode(event_type, object, Self::PaymentIntentPaymentFailed)
            }
            other => Self::Unsupported(other.to_owned()),
        }
    }

    /// `None` for event types reconciliation does not handle.
    pub fn facts(&self) -> Option<PaymentFacts> {
        match self {
            Self::CheckoutSessionCompleted(session) => Some(session_facts(
                session,
                checkout_status(session.payment_status.as_deref()),
            )),
            Self::CheckoutSessionAsyncPaymentSucceeded(session) => {
                Some(session_facts(session, Some(PaymentStatus::Succeeded)))
            }
            Self::CheckoutSessionAsyncPaymentFailed(session) => {
                Some(session_facts(session, Some(PaymentStatus::Failed)))
            }
            Self::PaymentIntentSucceeded(intent) => {
                Some(intent_facts(intent, PaymentStatus::Succeeded))
            }
            Self::PaymentIntentProcessing(intent) => {
                Some(intent_facts(intent, PaymentStatus::Pending))
            }
            Self::PaymentIntentPaymentFailed(intent) => {
                Some(intent_facts(intent, PaymentStatus::Failed))
            }
            Self::Unsupported(_) | Self::Undecodable { .. } => None,
        }
    }
}

fn decode<T, F>(event_type: &str, object: &serde_json::Value, wrap: F) -> ProviderEvent
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> ProviderEvent,
{
    match T::deserialize(object) {
        Ok(value) => wrap(value),
        Err(e) => ProviderEvent::Undecodable {
            event_type: event_type.to_owned(),
            reason: e.to_string(),
        },
    }
}

fn checkout_status(payment_status: Option<&str>) -> Option<PaymentStatus> {
    match payment_status? {
        "paid" | "no_payment_required" => Some(PaymentStatus::Succeeded),
        "unpaid" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

fn session_facts(session: &CheckoutSession, status: Option<PaymentStatus>) -> PaymentFacts {
    PaymentFacts {
        target: session.metadata.as_ref().and_then(RoutingMetadata::target),
        amounts: AmountFields {
            amount_total: session.amount_total,
            ..AmountFields::default()
        },
        currency: session.currency.clone(),
        provider_ref: session.payment_intent.as_ref().map(|pi| pi.id().to_owned()),
        checkout_session_id: Some(session.id.clone()),
        status,
    }
}

fn intent_facts(intent: &PaymentIntent, status: PaymentStatus) -> PaymentFacts {
    PaymentFacts {
        target: intent.metadata.as_ref().and_then(RoutingMetadata::target),
        amounts: AmountFields {
            amount_received: intent.amount_received,
            amount: intent.amount,
            ..AmountFields::default()
        },
        currency: intent.currency.clone(),
        provider_ref: Some(intent.id.clone()),
        checkout_session_id: None,
        status: Some(status),
    }
}
