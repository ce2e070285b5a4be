use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use ledgerline_domain::id::OrgId;
use ledgerline_domain::pagination::PageRequest;

use crate::domain::policy::DeliveryPolicy;
use crate::domain::repository::{EmailChannel, NotificationRepository};
use crate::domain::types::{
    EmailMessage, NOTIFICATION_CLAIM_LEASE_SECS, Notification, NotificationRecord,
    NotificationStatus,
};
use crate::error::{BillingServiceError, DeliveryError};

/// Deterministic identity of a notification.
///
/// - invoice: `invoice:{invoice_id}:{type}:{recipient_lowercased}`
/// - booking: `booking:{booking_id}:{type}:{recipient}`
/// - otherwise: `generic:{type}:{recipient}:{YYYY-MM-DD}` (UTC day of `now`)
pub fn compute_dedupe_key(notification: &Notification, now: DateTime<Utc>) -> String {
    let kind = &notification.notification_type;
    let recipient = &notification.recipient;
    if let Some(invoice_id) = &notification.invoice_id {
        format!(
            "invoice:{invoice_id}:{kind}:{}",
            recipient.to_lowercase()
        )
    } else if let Some(booking_id) = &notification.booking_id {
        format!("booking:{booking_id}:{kind}:{recipient}")
    } else {
        format!("generic:{kind}:{recipient}:{}", now.format("%Y-%m-%d"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// A record with this key was already sent; nothing went out.
    Duplicate,
    /// The channel failed; the sweep retries at `next_retry_at`.
    Deferred { next_retry_at: DateTime<Utc> },
    /// The channel failed for good or the retry budget is spent.
    Dead,
}

fn message_for(record: &NotificationRecord) -> EmailMessage {
    EmailMessage {
        to: record.notification.recipient.clone(),
        subject: record.notification.subject.clone(),
        body: record.notification.body.clone(),
        idempotency_key: record.dedupe_key.clone(),
    }
}

/// Applies one channel outcome to a record; `attempt_count` must already include it.
fn apply_attempt(
    record: &mut NotificationRecord,
    result: Result<(), DeliveryError>,
    policy: &DeliveryPolicy,
    now: DateTime<Utc>,
) -> SendOutcome {
    record.updated_at = now;
    match result {
        Ok(()) => {
            record.status = NotificationStatus::Sent;
            record.next_retry_at = None;
            record.last_error = None;
            SendOutcome::Sent
        }
        Err(e) if e.is_permanent() || record.attempt_count >= record.max_retries => {
            record.status = NotificationStatus::Dead;
            record.next_retry_at = None;
            record.last_error = Some(e.to_string());
            SendOutcome::Dead
        }
        Err(e) => {
            let next = policy.next_attempt_at(now, record.attempt_count);
            record.status = NotificationStatus::Pending;
            record.next_retry_at = Some(next);
            record.last_error = Some(e.to_string());
            SendOutcome::Deferred {
                next_retry_at: next,
            }
        }
    }
}

/// Send a notification at most once per dedupe key, recording failures for the sweep.
pub struct AttemptSendUseCase<N, C>
where
    N: NotificationRepository,
    C: EmailChannel,
{
    pub notifications: N,
    pub channel: C,
    pub policy: DeliveryPolicy,
}

impl<N, C> AttemptSendUseCase<N, C>
where
    N: NotificationRepository,
    C: EmailChannel,
{
    pub async fn execute(
        &self,
        notification: &Notification,
    ) -> Result<SendOutcome, BillingServiceError> {
        self.execute_at(notification, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, BillingServiceError> {
        self.execute_in_bucket(notification, now, now).await
    }

    /// Attempt a send whose dedupe key is bucketed by `bucket_at` instead of the attempt time.
    ///
    /// Outbox redeliveries pass the event's creation time so that a retry after midnight still
    /// lands on the record the first attempt created.
    pub async fn execute_in_bucket(
        &self,
        notification: &Notification,
        bucket_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, BillingServiceError> {
        let key = compute_dedupe_key(notification, bucket_at);
        let existing = self
            .notifications
            .find_by_key(notification.org_id, &key)
            .await?;

        let (mut record, is_new) = match existing {
            Some(record) if record.status == NotificationStatus::Sent => {
                tracing::debug!(dedupe_key = %key, "notification already sent");
                return Ok(SendOutcome::Duplicate);
            }
            Some(record) => (record, false),
            None => {
                let record = NotificationRecord::new(
                    notification.clone(),
                    key.clone(),
                    self.policy.max_attempts,
                    now,
                );
                (record, true)
            }
        };

        record.attempt_count += 1;
        let result = self.channel.send(&message_for(&record)).await;
        let outcome = apply_attempt(&mut record, result, &self.policy, now);

        if is_new && !self.notifications.insert(&record).await? {
            // Lost an insert race; fold this attempt into the winner's record.
            let Some(mut winner) = self
                .notifications
                .find_by_key(notification.org_id, &key)
                .await?
            else {
                return Err(anyhow::anyhow!("notification {key} vanished after conflict").into());
            };
            if winner.status != NotificationStatus::Sent && outcome == SendOutcome::Sent {
                winner.status = NotificationStatus::Sent;
                winner.next_retry_at = None;
                winner.last_error = None;
                winner.updated_at = now;
                self.notifications.save(&winner).await?;
            }
        } else if !is_new {
            self.notifications.save(&record).await?;
        }

        match outcome {
            SendOutcome::Dead => tracing::warn!(
                dedupe_key = %key,
                attempts = record.attempt_count,
                error = record.last_error.as_deref().unwrap_or_default(),
                "notification dead-lettered"
            ),
            SendOutcome::Deferred { next_retry_at } => tracing::info!(
                dedupe_key = %key,
                next_retry_at = %next_retry_at,
                "notification send failed, retry scheduled"
            ),
            _ => {}
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.sent == 0 && self.retried == 0 && self.dead == 0
    }
}

/// Background sweep over failed notifications whose retry time has come.
pub struct RetryNotificationsUseCase<N, C>
where
    N: NotificationRepository,
    C: EmailChannel,
{
    pub notifications: N,
    pub channel: C,
    pub policy: DeliveryPolicy,
}

impl<N, C> RetryNotificationsUseCase<N, C>
where
    N: NotificationRepository,
    C: EmailChannel,
{
    pub async fn execute(&self, limit: u64) -> Result<SweepReport, BillingServiceError> {
        self.execute_at(Utc::now(), limit).await
    }

    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<SweepReport, BillingServiceError> {
        let lease_until = now + Duration::seconds(NOTIFICATION_CLAIM_LEASE_SECS);
        let due = self
            .notifications
            .claim_due(now, lease_until, limit)
            .await?;

        let mut report = SweepReport::default();
        for mut record in due {
            record.attempt_count += 1;
            let result = self.channel.send(&message_for(&record)).await;
            match apply_attempt(&mut record, result, &self.policy, now) {
                SendOutcome::Sent => report.sent += 1,
                SendOutcome::Deferred { .. } => report.retried += 1,
                SendOutcome::Dead => {
                    tracing::warn!(
                        notification_id = %record.id,
                        dedupe_key = %record.dedupe_key,
                        attempts = record.attempt_count,
                        "notification dead-lettered"
                    );
                    report.dead += 1;
                }
                SendOutcome::Duplicate => {}
            }
            self.notifications.save(&record).await?;
        }
        Ok(report)
    }
}

pub struct ListNotificationDeadLettersUseCase<N: NotificationRepository> {
    pub notifications: N,
}

impl<N: NotificationRepository> ListNotificationDeadLettersUseCase<N> {
    pub async fn execute(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError> {
        self.notifications.list_dead(org_id, page.clamped()).await
    }
}

/// Dead → pending with a fresh retry budget; the next sweep picks it up.
pub struct ReplayNotificationUseCase<N: NotificationRepository> {
    pub notifications: N,
}

impl<N: NotificationRepository> ReplayNotificationUseCase<N> {
    pub async fn execute(&self, id: Uuid) -> Result<NotificationRecord, BillingServiceError> {
        self.execute_at(id, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, BillingServiceError> {
        let revived = self.notifications.revive_dead(id, now).await?;
        let record = self
            .notifications
            .find_by_id(id)
            .await?
            .ok_or(BillingServiceError::NotificationNotFound)?;
        if !revived {
            return Err(BillingServiceError::NotDeadLettered);
        }
        tracing::info!(
            notification_id = %id,
            dedupe_key = %record.dedupe_key,
            "dead notification replayed"
        );
        Ok(record)
    }
}
