use chrono::Duration;

use ledgerline_billing::domain::types::{Notification, NotificationStatus};
use ledgerline_billing::error::{BillingServiceError, DeliveryError};
use ledgerline_billing::usecase::notification::{
    AttemptSendUseCase, ListNotificationDeadLettersUseCase, ReplayNotificationUseCase,
    RetryNotificationsUseCase, SendOutcome, SweepReport,
};
use ledgerline_domain::id::InvoiceId;
use ledgerline_domain::pagination::PageRequest;

use crate::helpers::{MemoryNotifications, MockEmailChannel, fast_policy, now, org, other_org};

const KEY: &str = "invoice:inv_1:payment_confirmed:client@example.com";

fn confirmation(recipient: &str) -> Notification {
    Notification {
        org_id: org(),
        notification_type: "payment_confirmed".to_owned(),
        recipient: recipient.to_owned(),
        invoice_id: Some(InvoiceId::from("inv_1")),
        booking_id: None,
        subject: "Payment received".to_owned(),
        body: "We received your payment for invoice inv_1.".to_owned(),
    }
}

struct Harness {
    notifications: MemoryNotifications,
    email: MockEmailChannel,
}

impl Harness {
    fn new() -> Self {
        Self {
            notifications: MemoryNotifications::default(),
            email: MockEmailChannel::default(),
        }
    }

    fn sender(&self) -> AttemptSendUseCase<MemoryNotifications, MockEmailChannel> {
        AttemptSendUseCase {
            notifications: self.notifications.clone(),
            channel: self.email.clone(),
            policy: fast_policy(),
        }
    }

    fn sweeper(&self) -> RetryNotificationsUseCase<MemoryNotifications, MockEmailChannel> {
        RetryNotificationsUseCase {
            notifications: self.notifications.clone(),
            channel: self.email.clone(),
            policy: fast_policy(),
        }
    }

    fn replay(&self) -> ReplayNotificationUseCase<MemoryNotifications> {
        ReplayNotificationUseCase {
            notifications: self.notifications.clone(),
        }
    }
}

#[tokio::test]
async fn should_send_once_per_dedupe_key() {
    let h = Harness::new();

    let first = h
        .sender()
        .execute_at(&confirmation("client@example.com"), now())
        .await
        .unwrap();
    let second = h
        .sender()
        .execute_at(&confirmation("Client@Example.com"), now() + Duration::days(2))
        .await
        .unwrap();

    assert_eq!(first, SendOutcome::Sent);
    assert_eq!(second, SendOutcome::Duplicate);
    let sent = h.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "client@example.com");
    assert_eq!(sent[0].idempotency_key, KEY);

    let record = h.notifications.by_key(KEY);
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(h.notifications.all().len(), 1);
}

#[tokio::test]
async fn should_defer_transient_failure_until_sweep_is_due() {
    let h = Harness::new();
    h.email
        .script
        .fail_next(DeliveryError::Transient("connection refused".to_owned()));

    let outcome = h
        .sender()
        .execute_at(&confirmation("client@example.com"), now())
        .await
        .unwrap();
    let retry_at = now() + Duration::seconds(30);
    assert_eq!(
        outcome,
        SendOutcome::Deferred {
            next_retry_at: retry_at
        }
    );
    let record = h.notifications.by_key(KEY);
    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(
        record.last_error.as_deref(),
        Some("transient delivery failure: connection refused")
    );

    let early = h
        .sweeper()
        .execute_at(now() + Duration::seconds(10), 10)
        .await
        .unwrap();
    assert!(early.is_empty());
    assert!(h.email.sent().is_empty());

    let due = h.sweeper().execute_at(retry_at, 10).await.unwrap();
    assert_eq!(
        due,
        SweepReport {
            sent: 1,
            retried: 0,
            dead: 0
        }
    );
    let record = h.notifications.by_key(KEY);
    assert_eq!(record.status, NotificationStatus::Sent);
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.next_retry_at, None);
    assert_eq!(record.last_error, None);
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn should_dead_letter_after_budget_then_replay() {
    let h = Harness::new();
    h.email
        .script
        .fail_always(DeliveryError::Transient("503".to_owned()));

    h.sender()
        .execute_at(&confirmation("client@example.com"), now())
        .await
        .unwrap();
    let t2 = now() + Duration::seconds(30);
    let second = h.sweeper().execute_at(t2, 10).await.unwrap();
    assert_eq!(second.retried, 1);
    let t3 = t2 + Duration::seconds(60);
    let third = h.sweeper().execute_at(t3, 10).await.unwrap();
    assert_eq!(third.dead, 1);

    let record = h.notifications.by_key(KEY);
    assert_eq!(record.status, NotificationStatus::Dead);
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.next_retry_at, None);

    let after = h
        .sweeper()
        .execute_at(t3 + Duration::days(1), 10)
        .await
        .unwrap();
    assert!(after.is_empty(), "dead records are left for the operator");

    let listed = ListNotificationDeadLettersUseCase {
        notifications: h.notifications.clone(),
    }
    .execute(Some(org()), PageRequest::default())
    .await
    .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);

    let none_for_other = ListNotificationDeadLettersUseCase {
        notifications: h.notifications.clone(),
    }
    .execute(Some(other_org()), PageRequest::default())
    .await
    .unwrap();
    assert!(none_for_other.is_empty());

    let replay_at = t3 + Duration::hours(2);
    let revived = h.replay().execute_at(record.id, replay_at).await.unwrap();
    assert_eq!(revived.status, NotificationStatus::Pending);
    assert_eq!(revived.attempt_count, 0);
    assert_eq!(revived.next_retry_at, Some(replay_at));
    assert_eq!(revived.last_error, None);

    h.email.script.recover();
    let report = h.sweeper().execute_at(replay_at, 10).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.notifications.by_key(KEY).attempt_count, 1);
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn should_dead_letter_permanent_failure_immediately() {
    let h = Harness::new();
    h.email
        .script
        .fail_next(DeliveryError::Permanent("http status 422".to_owned()));

    let outcome = h
        .sender()
        .execute_at(&confirmation("client@example.com"), now())
        .await
        .unwrap();

    assert_eq!(outcome, SendOutcome::Dead);
    let record = h.notifications.by_key(KEY);
    assert_eq!(record.status, NotificationStatus::Dead);
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test]
async fn should_retry_unsent_record_on_next_send_attempt() {
    let h = Harness::new();
    h.email
        .script
        .fail_next(DeliveryError::Transient("timeout".to_owned()));
    h.sender()
        .execute_at(&confirmation("client@example.com"), now())
        .await
        .unwrap();

    let outcome = h
        .sender()
        .execute_at(&confirmation("client@example.com"), now() + Duration::seconds(1))
        .await
        .unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(h.notifications.all().len(), 1);
    assert_eq!(h.notifications.by_key(KEY).attempt_count, 2);
}

#[tokio::test]
async fn should_refuse_to_replay_live_or_unknown_records() {
    let h = Harness::new();
    h.sender()
        .execute_at(&confirmation("client@example.com"), now())
        .await
        .unwrap();
    let sent = h.notifications.by_key(KEY);

    let live = h.replay().execute_at(sent.id, now()).await;
    assert!(matches!(live, Err(BillingServiceError::NotDeadLettered)));

    let unknown = h.replay().execute_at(uuid::Uuid::now_v7(), now()).await;
    assert!(matches!(
        unknown,
        Err(BillingServiceError::NotificationNotFound)
    ));
}
