use chrono::Duration;
use serde_json::json;

use ledgerline_billing::domain::policy::DeliveryPolicy;
use ledgerline_billing::domain::types::{
    NewOutboxEvent, Notification, NotificationStatus, OutboxKind, OutboxStatus,
};
use ledgerline_billing::error::{BillingServiceError, DeliveryError};
use ledgerline_billing::usecase::dispatch::{
    OutboxDeliveryRouter, ProcessOutboxUseCase, ProcessReport,
};
use ledgerline_billing::usecase::notification::AttemptSendUseCase;
use ledgerline_billing::usecase::outbox::{
    EnqueueOutboxUseCase, ListOutboxDeadLettersUseCase, ReplayOutboxUseCase,
};
use ledgerline_domain::id::InvoiceId;
use ledgerline_domain::pagination::PageRequest;

use crate::helpers::{
    MemoryNotifications, MemoryOutbox, MockEmailChannel, MockWebhookChannel, fast_policy, now,
    org, other_org,
};

type DeliveryRouter = OutboxDeliveryRouter<MemoryNotifications, MockEmailChannel, MockWebhookChannel>;

struct Harness {
    outbox: MemoryOutbox,
    notifications: MemoryNotifications,
    email: MockEmailChannel,
    webhook: MockWebhookChannel,
}

impl Harness {
    fn new() -> Self {
        Self {
            outbox: MemoryOutbox::default(),
            notifications: MemoryNotifications::default(),
            email: MockEmailChannel::default(),
            webhook: MockWebhookChannel::default(),
        }
    }

    fn dispatcher(&self, policy: DeliveryPolicy) -> ProcessOutboxUseCase<MemoryOutbox, DeliveryRouter> {
        ProcessOutboxUseCase {
            outbox: self.outbox.clone(),
            adapter: OutboxDeliveryRouter {
                email: AttemptSendUseCase {
                    notifications: self.notifications.clone(),
                    channel: self.email.clone(),
                    policy: fast_policy(),
                },
                webhook: self.webhook.clone(),
                export_allowed_hosts: vec!["exports.example.com".to_owned()],
            },
            policy,
        }
    }

    async fn enqueue(&self, event: NewOutboxEvent) -> uuid::Uuid {
        EnqueueOutboxUseCase {
            outbox: self.outbox.clone(),
        }
        .execute_at(event, now())
        .await
        .unwrap()
        .id
    }
}

fn webhook_event(dedupe_key: &str) -> NewOutboxEvent {
    NewOutboxEvent {
        org_id: org(),
        kind: OutboxKind::Webhook,
        payload: json!({
            "url": "https://hooks.partner.example/billing",
            "event_type": "invoice.paid",
            "body": { "invoice_id": "inv_1" }
        }),
        dedupe_key: dedupe_key.to_owned(),
    }
}

fn export_event(url: &str) -> NewOutboxEvent {
    NewOutboxEvent {
        org_id: org(),
        kind: OutboxKind::Export,
        payload: json!({ "url": url, "event_type": "ledger.export", "body": {} }),
        dedupe_key: format!("export:{url}"),
    }
}

fn confirmation() -> Notification {
    Notification {
        org_id: org(),
        notification_type: "payment_confirmed".to_owned(),
        recipient: "client@example.com".to_owned(),
        invoice_id: Some(InvoiceId::from("inv_1")),
        booking_id: None,
        subject: "Payment received".to_owned(),
        body: "Thanks".to_owned(),
    }
}

fn email_event(dedupe_key: &str) -> NewOutboxEvent {
    NewOutboxEvent {
        org_id: org(),
        kind: OutboxKind::Email,
        payload: serde_json::to_value(confirmation()).unwrap(),
        dedupe_key: dedupe_key.to_owned(),
    }
}

// ── Enqueue ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_enqueue_once_per_dedupe_key() {
    let h = Harness::new();

    let first = h.enqueue(webhook_event("invoice:inv_1:paid")).await;
    let second = h.enqueue(webhook_event("invoice:inv_1:paid")).await;

    assert_eq!(first, second);
    let events = h.outbox.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, OutboxStatus::Pending);
    assert_eq!(events[0].next_attempt_at, Some(now()));
}

#[tokio::test]
async fn should_scope_dedupe_key_to_org() {
    let h = Harness::new();

    let first = h.enqueue(webhook_event("same-key")).await;
    let second = h
        .enqueue(NewOutboxEvent {
            org_id: other_org(),
            ..webhook_event("same-key")
        })
        .await;

    assert_ne!(first, second);
    assert_eq!(h.outbox.events().await.len(), 2);
}

#[tokio::test]
async fn should_reject_blank_dedupe_key() {
    let h = Harness::new();
    let result = EnqueueOutboxUseCase {
        outbox: h.outbox.clone(),
    }
    .execute_at(webhook_event(" "), now())
    .await;

    assert!(matches!(result, Err(BillingServiceError::MalformedPayload)));
    assert!(h.outbox.events().await.is_empty());
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_deliver_webhook_with_idempotency_key() {
    let h = Harness::new();
    let id = h.enqueue(webhook_event("invoice:inv_1:paid")).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(
        report,
        ProcessReport {
            sent: 1,
            dead: 0,
            pending: 0
        }
    );
    let requests = h.webhook.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://hooks.partner.example/billing");
    assert_eq!(requests[0].event_type, "invoice.paid");
    assert_eq!(requests[0].idempotency_key, "invoice:inv_1:paid");

    let event = h.outbox.event(id).await;
    assert_eq!(event.status, OutboxStatus::Sent);
    assert_eq!(event.attempts, 1);
    assert_eq!(event.next_attempt_at, None);

    let again = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();
    assert!(again.is_empty(), "sent events are never redelivered");
}

#[tokio::test]
async fn should_back_off_exponentially_then_dead_letter() {
    let h = Harness::new();
    h.webhook
        .script
        .fail_always(DeliveryError::Transient("503 Service Unavailable".to_owned()));
    let id = h.enqueue(webhook_event("k")).await;
    let dispatcher = h.dispatcher(fast_policy());

    // attempt 1 → retry in 30s
    let report = dispatcher.execute_at(now(), 10).await.unwrap();
    assert_eq!(report.pending, 1);
    let event = h.outbox.event(id).await;
    assert_eq!(event.status, OutboxStatus::Retry);
    assert_eq!(event.attempts, 1);
    assert_eq!(event.next_attempt_at, Some(now() + Duration::seconds(30)));

    // not due yet
    let report = dispatcher
        .execute_at(now() + Duration::seconds(29), 10)
        .await
        .unwrap();
    assert!(report.is_empty());

    // attempt 2 → retry in 60s
    let t2 = now() + Duration::seconds(30);
    dispatcher.execute_at(t2, 10).await.unwrap();
    let event = h.outbox.event(id).await;
    assert_eq!(event.attempts, 2);
    assert_eq!(event.next_attempt_at, Some(t2 + Duration::seconds(60)));

    // attempt 3 reaches max_attempts
    let report = dispatcher
        .execute_at(t2 + Duration::seconds(60), 10)
        .await
        .unwrap();
    assert_eq!(report.dead, 1);
    let event = h.outbox.event(id).await;
    assert_eq!(event.status, OutboxStatus::Dead);
    assert_eq!(event.attempts, 3);
    assert_eq!(
        event.last_error.as_deref(),
        Some("transient delivery failure: 503 Service Unavailable")
    );
    assert_eq!(h.webhook.requests().len(), 3);
}

#[tokio::test]
async fn should_dead_letter_permanent_failure_immediately() {
    let h = Harness::new();
    h.webhook
        .script
        .fail_next(DeliveryError::Permanent("http status 410 Gone".to_owned()));
    let id = h.enqueue(webhook_event("k")).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.dead, 1);
    assert_eq!(h.outbox.event(id).await.status, OutboxStatus::Dead);
}

#[tokio::test]
async fn should_dead_letter_export_to_unlisted_host_with_audit_row() {
    let h = Harness::new();
    let id = h.enqueue(export_event("https://evil.example.net/dump")).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.dead, 1);
    assert!(h.webhook.requests().is_empty(), "nothing leaves the building");
    let letters = h.outbox.export_dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].outbox_event_id, id);
    assert_eq!(
        letters[0].target_url.as_deref(),
        Some("https://evil.example.net/dump")
    );
}

#[tokio::test]
async fn should_deliver_export_to_listed_host() {
    let h = Harness::new();
    h.enqueue(export_event("https://exports.example.com/ingest"))
        .await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.sent, 1);
    assert!(h.outbox.export_dead_letters().await.is_empty());
}

#[tokio::test]
async fn should_dead_letter_unknown_kind() {
    let h = Harness::new();
    let mut event = webhook_event("sms-1").into_event(now());
    event.kind = "sms".to_owned();
    let id = event.id;
    h.outbox.seed(event).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.dead, 1);
    let event = h.outbox.event(id).await;
    assert_eq!(event.status, OutboxStatus::Dead);
    assert!(event.last_error.unwrap().contains("sms"));
}

#[tokio::test]
async fn should_respect_batch_limit_in_creation_order() {
    let h = Harness::new();
    let first = h.enqueue(webhook_event("a")).await;
    let second = h.enqueue(webhook_event("b")).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 1).await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(h.outbox.event(first).await.status, OutboxStatus::Sent);
    assert_eq!(h.outbox.event(second).await.status, OutboxStatus::Pending);
}

// ── Email through the notification layer ─────────────────────────────────────

#[tokio::test]
async fn should_send_email_once_across_duplicate_outbox_events() {
    let h = Harness::new();
    h.enqueue(email_event("confirmation-from-webhook")).await;
    h.enqueue(email_event("confirmation-from-admin")).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.sent, 2);
    let sent = h.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].idempotency_key,
        "invoice:inv_1:payment_confirmed:client@example.com"
    );
    let record = h
        .notifications
        .by_key("invoice:inv_1:payment_confirmed:client@example.com");
    assert_eq!(record.status, NotificationStatus::Sent);
}

#[tokio::test]
async fn should_hand_failed_email_to_notification_retry() {
    let h = Harness::new();
    h.email
        .script
        .fail_next(DeliveryError::Transient("smtp timeout".to_owned()));
    let id = h.enqueue(email_event("confirmation")).await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(h.outbox.event(id).await.status, OutboxStatus::Sent);
    let record = h
        .notifications
        .by_key("invoice:inv_1:payment_confirmed:client@example.com");
    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(record.attempt_count, 1);
    assert!(record.next_retry_at.is_some());
    assert_eq!(
        record.last_error.as_deref(),
        Some("transient delivery failure: smtp timeout")
    );
}

#[tokio::test]
async fn should_bucket_generic_email_by_outbox_creation_day() {
    let h = Harness::new();
    let generic = Notification {
        invoice_id: None,
        ..confirmation()
    };
    let id = EnqueueOutboxUseCase {
        outbox: h.outbox.clone(),
    }
    .execute_at(
        NewOutboxEvent {
            payload: serde_json::to_value(generic).unwrap(),
            ..email_event("reminder")
        },
        now() - Duration::days(3),
    )
    .await
    .unwrap()
    .id;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(h.outbox.event(id).await.status, OutboxStatus::Sent);
    let records = h.notifications.all();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].dedupe_key,
        "generic:payment_confirmed:client@example.com:2026-10-12"
    );
    assert_eq!(records[0].status, NotificationStatus::Sent);
}

#[tokio::test]
async fn should_dead_letter_undecodable_email_payload() {
    let h = Harness::new();
    let id = h
        .enqueue(NewOutboxEvent {
            payload: json!({ "to": "nobody" }),
            ..email_event("broken")
        })
        .await;

    let report = h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    assert_eq!(report.dead, 1);
    assert_eq!(h.outbox.event(id).await.status, OutboxStatus::Dead);
    assert!(h.email.sent().is_empty());
}

// ── Dead letters and replay ──────────────────────────────────────────────────

#[tokio::test]
async fn should_list_dead_events_by_org_and_replay_them() {
    let h = Harness::new();
    h.webhook
        .script
        .fail_always(DeliveryError::Permanent("http status 404 Not Found".to_owned()));
    let ours = h.enqueue(webhook_event("ours")).await;
    h.enqueue(NewOutboxEvent {
        org_id: other_org(),
        ..webhook_event("theirs")
    })
    .await;
    h.dispatcher(fast_policy()).execute_at(now(), 10).await.unwrap();

    let listed = ListOutboxDeadLettersUseCase {
        outbox: h.outbox.clone(),
    }
    .execute(Some(org()), PageRequest::default())
    .await
    .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, ours);

    let replay = ReplayOutboxUseCase {
        outbox: h.outbox.clone(),
    };
    let later = now() + Duration::hours(1);
    let revived = replay.execute_at(ours, later).await.unwrap();
    assert_eq!(revived.status, OutboxStatus::Pending);
    assert_eq!(revived.attempts, 0);
    assert_eq!(revived.last_error, None);
    assert_eq!(revived.next_attempt_at, Some(later));

    h.webhook.script.recover();
    let report = h.dispatcher(fast_policy()).execute_at(later, 10).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.outbox.event(ours).await.status, OutboxStatus::Sent);
}

#[tokio::test]
async fn should_refuse_to_replay_live_or_unknown_events() {
    let h = Harness::new();
    let id = h.enqueue(webhook_event("live")).await;
    let replay = ReplayOutboxUseCase {
        outbox: h.outbox.clone(),
    };

    let live = replay.execute_at(id, now()).await;
    assert!(matches!(live, Err(BillingServiceError::NotDeadLettered)));

    let unknown = replay.execute_at(uuid::Uuid::now_v7(), now()).await;
    assert!(matches!(unknown, Err(BillingServiceError::OutboxEventNotFound)));
}
