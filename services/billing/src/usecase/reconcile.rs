use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::provider_event::{PaymentFacts, ProviderEvent};
use crate::domain::repository::LedgerTransaction;
use crate::domain::types::{
    BillableAggregate, NewOutboxEvent, Notification, OutboxKind, Payment, PaymentStatus,
    PaymentTarget, STRIPE_PROVIDER, SettlementStatus,
};
use crate::error::BillingServiceError;
use crate::usecase::notification::compute_dedupe_key;

/// Why a verified event was recorded as `ignored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedEvent,
    UndecodableObject,
    MissingMetadata,
    UnrecognizedStatus,
    UnknownAggregate,
    ZeroAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted(Uuid),
    Updated(Uuid),
    /// The charge is already recorded as reported; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Applied {
        outcome: RegisterOutcome,
        status: SettlementStatus,
    },
    Ignored(IgnoreReason),
}

impl Reconciliation {
    /// `true` when this call changed a payment row.
    pub fn applied_payment(&self) -> bool {
        matches!(
            self,
            Self::Applied {
                outcome: RegisterOutcome::Inserted(_) | RegisterOutcome::Updated(_),
                ..
            }
        )
    }
}

/// Payment row values derived from the event and the locked aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRegistration {
    pub target: PaymentTarget,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub checkout_session_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

/// Apply one verified provider event to its invoice or booking inside `tx`.
pub async fn reconcile<T: LedgerTransaction>(
    tx: &mut T,
    event: &ProviderEvent,
    now: DateTime<Utc>,
) -> Result<Reconciliation, BillingServiceError> {
    let Some(facts) = event.facts() else {
        let reason = match event {
            ProviderEvent::Undecodable { event_type, reason } => {
                tracing::info!(
                    event_type = %event_type,
                    reason = %reason,
                    "undecodable event object"
                );
                IgnoreReason::UndecodableObject
            }
            _ => IgnoreReason::UnsupportedEvent,
        };
        return Ok(Reconciliation::Ignored(reason));
    };
    let Some(target) = facts.target.clone() else {
        return Ok(Reconciliation::Ignored(IgnoreReason::MissingMetadata));
    };
    let Some(status) = facts.status else {
        return Ok(Reconciliation::Ignored(IgnoreReason::UnrecognizedStatus));
    };

    // Serialises every delivery touching this aggregate until commit.
    let Some(aggregate) = tx.lock_aggregate(&target).await? else {
        tracing::warn!(aggregate = %target, "payment event for unknown aggregate");
        return Ok(Reconciliation::Ignored(IgnoreReason::UnknownAggregate));
    };

    let Some(registration) = registration_for(&facts, &aggregate, status) else {
        return Ok(Reconciliation::Ignored(IgnoreReason::ZeroAmount));
    };

    let outcome = register_payment(tx, &registration, now).await?;

    let payments = tx.list_payments(&target).await?;
    let derived = SettlementStatus::derive(&payments, aggregate.owed_cents);
    tx.set_aggregate_status(&target, derived, now).await?;
    if derived != aggregate.status {
        tracing::info!(
            aggregate = %target,
            from = %aggregate.status,
            to = %derived,
            "aggregate settlement status changed"
        );
    }

    if derived == SettlementStatus::Paid && status == PaymentStatus::Succeeded {
        let notification = confirmation_for(&aggregate);
        let dedupe_key = compute_dedupe_key(&notification, now);
        let payload = serde_json::to_value(&notification)
            .map_err(|e| anyhow::anyhow!("serialize notification: {e}"))?;
        tx.enqueue_outbox(
            &NewOutboxEvent {
                org_id: aggregate.org_id,
                kind: OutboxKind::Email,
                payload,
                dedupe_key,
            },
            now,
        )
        .await?;
    }

    Ok(Reconciliation::Applied {
        outcome,
        status: derived,
    })
}

/// Resolve amount and currency. `None` means there is nothing to apply.
fn registration_for(
    facts: &PaymentFacts,
    aggregate: &BillableAggregate,
    status: PaymentStatus,
) -> Option<PaymentRegistration> {
    // Providers omit every amount field on some session events; the amount owed stands in.
    let amount_cents = facts.amounts.resolve().unwrap_or(aggregate.owed_cents);
    if amount_cents <= 0 {
        return None;
    }
    let currency = facts
        .currency
        .as_deref()
        .unwrap_or(&aggregate.currency)
        .to_ascii_uppercase();
    Some(PaymentRegistration {
        target: aggregate.target.clone(),
        provider: STRIPE_PROVIDER.to_owned(),
        provider_ref: facts.provider_ref.clone(),
        checkout_session_id: facts.checkout_session_id.clone(),
        amount_cents,
        currency,
        status,
    })
}

/// Idempotent upsert keyed by `(provider, provider_ref)`, then by
/// `(aggregate, checkout_session_id)`.
pub async fn register_payment<T: LedgerTransaction>(
    tx: &mut T,
    registration: &PaymentRegistration,
    now: DateTime<Utc>,
) -> Result<RegisterOutcome, BillingServiceError> {
    if let Some(existing) = find_existing(tx, registration).await? {
        if existing.target != registration.target {
            tracing::warn!(
                payment_id = %existing.id,
                provider_ref = registration.provider_ref.as_deref().unwrap_or_default(),
                recorded_for = %existing.target,
                reported_for = %registration.target,
                "provider reference already applied to another aggregate"
            );
            return Ok(RegisterOutcome::Duplicate);
        }
        return update_existing(tx, existing, registration).await;
    }

    let payment = Payment {
        id: Uuid::now_v7(),
        target: registration.target.clone(),
        provider: registration.provider.clone(),
        provider_ref: registration.provider_ref.clone(),
        checkout_session_id: registration.checkout_session_id.clone(),
        amount_cents: registration.amount_cents,
        currency: registration.currency.clone(),
        status: registration.status,
        received_at: now,
    };
    if tx.insert_payment(&payment).await? {
        tracing::info!(
            payment_id = %payment.id,
            aggregate = %payment.target,
            amount_cents = payment.amount_cents,
            status = %payment.status,
            "payment recorded"
        );
        return Ok(RegisterOutcome::Inserted(payment.id));
    }

    // A concurrent reconciliation inserted the same charge first; apply on top of its row.
    match find_existing(tx, registration).await? {
        Some(existing) if existing.target == registration.target => {
            update_existing(tx, existing, registration).await
        }
        _ => Ok(RegisterOutcome::Duplicate),
    }
}

async fn find_existing<T: LedgerTransaction>(
    tx: &mut T,
    registration: &PaymentRegistration,
) -> Result<Option<Payment>, BillingServiceError> {
    if let Some(provider_ref) = &registration.provider_ref {
        if let Some(found) = tx
            .find_payment_by_provider_ref(&registration.provider, provider_ref)
            .await?
        {
            return Ok(Some(found));
        }
    }
    if let Some(session) = &registration.checkout_session_id {
        return tx
            .find_payment_by_checkout_session(&registration.target, session)
            .await;
    }
    Ok(None)
}

async fn update_existing<T: LedgerTransaction>(
    tx: &mut T,
    mut existing: Payment,
    registration: &PaymentRegistration,
) -> Result<RegisterOutcome, BillingServiceError> {
    if !existing.status.can_become(registration.status) {
        return Ok(RegisterOutcome::Duplicate);
    }
    let provider_ref = existing
        .provider_ref
        .clone()
        .or_else(|| registration.provider_ref.clone());
    let checkout_session_id = existing
        .checkout_session_id
        .clone()
        .or_else(|| registration.checkout_session_id.clone());
    let unchanged = existing.status == registration.status
        && existing.amount_cents == registration.amount_cents
        && existing.currency == registration.currency
        && existing.provider_ref == provider_ref
        && existing.checkout_session_id == checkout_session_id;
    if unchanged {
        return Ok(RegisterOutcome::Duplicate);
    }

    existing.status = registration.status;
    existing.amount_cents = registration.amount_cents;
    existing.currency = registration.currency.clone();
    existing.provider_ref = provider_ref;
    existing.checkout_session_id = checkout_session_id;
    tx.update_payment(&existing).await?;
    tracing::info!(
        payment_id = %existing.id,
        status = %existing.status,
        amount_cents = existing.amount_cents,
        "payment updated"
    );
    Ok(RegisterOutcome::Updated(existing.id))
}

fn confirmation_for(aggregate: &BillableAggregate) -> Notification {
    let amount = format!(
        "{}.{:02} {}",
        aggregate.owed_cents / 100,
        aggregate.owed_cents % 100,
        aggregate.currency
    );
    match &aggregate.target {
        PaymentTarget::Invoice(id) => Notification {
            org_id: aggregate.org_id,
            notification_type: "payment_confirmed".to_owned(),
            recipient: aggregate.customer_email.clone(),
            invoice_id: Some(id.clone()),
            booking_id: None,
            subject: format!("Payment received for invoice {id}"),
            body: format!("We received your payment of {amount} for invoice {id}."),
        },
        PaymentTarget::Booking(id) => Notification {
            org_id: aggregate.org_id,
            notification_type: "deposit_confirmed".to_owned(),
            recipient: aggregate.customer_email.clone(),
            invoice_id: None,
            booking_id: Some(id.clone()),
            subject: "Your booking deposit is confirmed".to_owned(),
            body: format!("We received your deposit of {amount} for booking {id}."),
        },
    }
}
