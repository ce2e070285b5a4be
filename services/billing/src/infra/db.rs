use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use ledgerline_billing_schema::{export_dead_letters, notification_records, outbox_events};
use ledgerline_core::sea_ext::ForUpdateSkipLocked;
use ledgerline_domain::id::OrgId;
use ledgerline_domain::pagination::PageRequest;

use crate::domain::repository::{NotificationRepository, OutboxBatch, OutboxRepository};
use crate::domain::types::{
    ExportDeadLetter, NewOutboxEvent, Notification, NotificationRecord, NotificationStatus,
    OutboxEvent, OutboxStatus,
};
use crate::error::BillingServiceError;

// ── Outbox repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
}

impl OutboxRepository for DbOutboxRepository {
    type Batch = DbOutboxBatch;

    async fn enqueue(
        &self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError> {
        enqueue_outbox_event(&self.db, event, now).await
    }

    async fn begin_batch(&self) -> Result<DbOutboxBatch, BillingServiceError> {
        let txn = self.db.begin().await.context("begin outbox batch")?;
        Ok(DbOutboxBatch { txn })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, BillingServiceError> {
        let model = outbox_events::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("find outbox event")?;
        model.map(outbox_from_model).transpose()
    }

    async fn list_dead(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError> {
        let mut query = outbox_events::Entity::find()
            .filter(outbox_events::Column::Status.eq(OutboxStatus::Dead.as_str()));
        if let Some(org_id) = org_id {
            query = query.filter(outbox_events::Column::OrgId.eq(org_id.0));
        }
        let models = query
            .order_by_desc(outbox_events::Column::UpdatedAt)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .context("list dead outbox events")?;
        models.into_iter().map(outbox_from_model).collect()
    }

    async fn revive_dead(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingServiceError> {
        let result = outbox_events::Entity::update_many()
            .col_expr(
                outbox_events::Column::Status,
                Expr::value(OutboxStatus::Pending.as_str()),
            )
            .col_expr(outbox_events::Column::Attempts, Expr::value(0))
            .col_expr(outbox_events::Column::NextAttemptAt, Expr::value(now))
            .col_expr(
                outbox_events::Column::LastError,
                Expr::value(Option::<String>::None),
            )
            .col_expr(outbox_events::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_events::Column::Id.eq(id))
            .filter(outbox_events::Column::Status.eq(OutboxStatus::Dead.as_str()))
            .exec(&self.db)
            .await
            .context("revive dead outbox event")?;
        Ok(result.rows_affected > 0)
    }
}

/// Dispatcher transaction; rows locked by `lock_due` stay locked until commit or drop.
pub struct DbOutboxBatch {
    txn: DatabaseTransaction,
}

impl OutboxBatch for DbOutboxBatch {
    async fn lock_due(
        &mut self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEvent>, BillingServiceError> {
        let models = outbox_events::Entity::find()
            .filter(outbox_events::Column::Status.is_in([
                OutboxStatus::Pending.as_str(),
                OutboxStatus::Retry.as_str(),
            ]))
            .filter(outbox_events::Column::NextAttemptAt.lte(now))
            .order_by_asc(outbox_events::Column::CreatedAt)
            .limit(limit)
            .for_update_skip_locked()
            .all(&self.txn)
            .await
            .context("lock due outbox events")?;
        models.into_iter().map(outbox_from_model).collect()
    }

    async fn save(&mut self, event: &OutboxEvent) -> Result<(), BillingServiceError> {
        let mut model = outbox_events::ActiveModel {
            id: Set(event.id),
            status: Set(event.status.as_str().to_owned()),
            attempts: Set(event.attempts),
            next_attempt_at: Set(event.next_attempt_at),
            last_error: Set(event.last_error.clone()),
            updated_at: Set(event.updated_at),
            ..Default::default()
        };
        if event.status == OutboxStatus::Sent {
            model.sent_at = Set(Some(event.updated_at));
        }
        model
            .update(&self.txn)
            .await
            .context("save outbox event")?;
        Ok(())
    }

    async fn record_export_dead_letter(
        &mut self,
        letter: &ExportDeadLetter,
    ) -> Result<(), BillingServiceError> {
        let model = export_dead_letters::ActiveModel {
            id: Set(letter.id),
            outbox_event_id: Set(letter.outbox_event_id),
            org_id: Set(letter.org_id.0),
            target_url: Set(letter.target_url.clone()),
            last_error: Set(letter.last_error.clone()),
            attempts: Set(letter.attempts),
            payload: Set(letter.payload.clone()),
            created_at: Set(letter.created_at),
        };
        // A replayed export that dies again refreshes its audit row.
        export_dead_letters::Entity::insert(model)
            .on_conflict(
                OnConflict::column(export_dead_letters::Column::OutboxEventId)
                    .update_columns([
                        export_dead_letters::Column::TargetUrl,
                        export_dead_letters::Column::LastError,
                        export_dead_letters::Column::Attempts,
                        export_dead_letters::Column::Payload,
                        export_dead_letters::Column::CreatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await
            .context("record export dead letter")?;
        Ok(())
    }

    async fn commit(self) -> Result<(), BillingServiceError> {
        self.txn.commit().await.context("commit outbox batch")?;
        Ok(())
    }
}

/// `INSERT ... ON CONFLICT (org_id, dedupe_key) DO NOTHING`, then re-read the winner.
pub(crate) async fn enqueue_outbox_event<C: ConnectionTrait>(
    conn: &C,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<OutboxEvent, BillingServiceError> {
    let row = event.clone().into_event(now);
    let model = outbox_events::ActiveModel {
        id: Set(row.id),
        org_id: Set(row.org_id.0),
        kind: Set(row.kind.clone()),
        payload: Set(row.payload.clone()),
        dedupe_key: Set(row.dedupe_key.clone()),
        status: Set(row.status.as_str().to_owned()),
        attempts: Set(row.attempts),
        next_attempt_at: Set(row.next_attempt_at),
        last_error: Set(None),
        created_at: Set(row.created_at),
        updated_at: Set(row.updated_at),
        sent_at: Set(None),
    };
    outbox_events::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([
                outbox_events::Column::OrgId,
                outbox_events::Column::DedupeKey,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .context("insert outbox event")?;

    let stored = outbox_events::Entity::find()
        .filter(outbox_events::Column::OrgId.eq(row.org_id.0))
        .filter(outbox_events::Column::DedupeKey.eq(row.dedupe_key.as_str()))
        .one(conn)
        .await
        .context("re-read outbox event")?
        .with_context(|| format!("outbox event {} missing after insert", row.dedupe_key))?;
    outbox_from_model(stored)
}

fn outbox_from_model(model: outbox_events::Model) -> Result<OutboxEvent, BillingServiceError> {
    Ok(OutboxEvent {
        id: model.id,
        org_id: OrgId(model.org_id),
        kind: model.kind,
        payload: model.payload,
        dedupe_key: model.dedupe_key,
        status: model.status.parse().context("decode outbox status")?,
        attempts: model.attempts,
        next_attempt_at: model.next_attempt_at,
        last_error: model.last_error,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

// ── Notification repository ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbNotificationRepository {
    pub db: DatabaseConnection,
}

impl NotificationRepository for DbNotificationRepository {
    async fn find_by_key(
        &self,
        org_id: OrgId,
        dedupe_key: &str,
    ) -> Result<Option<NotificationRecord>, BillingServiceError> {
        let model = notification_records::Entity::find()
            .filter(notification_records::Column::OrgId.eq(org_id.0))
            .filter(notification_records::Column::DedupeKey.eq(dedupe_key))
            .one(&self.db)
            .await
            .context("find notification by dedupe key")?;
        model.map(notification_from_model).transpose()
    }

    async fn find_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<NotificationRecord>, BillingServiceError> {
        let model = notification_records::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("find notification by id")?;
        model.map(notification_from_model).transpose()
    }

    async fn insert(&self, record: &NotificationRecord) -> Result<bool, BillingServiceError> {
        let payload =
            serde_json::to_value(&record.notification).context("encode notification payload")?;
        let model = notification_records::ActiveModel {
            id: Set(record.id),
            org_id: Set(record.org_id.0),
            dedupe_key: Set(record.dedupe_key.clone()),
            notification_type: Set(record.notification.notification_type.clone()),
            recipient: Set(record.notification.recipient.clone()),
            payload: Set(payload),
            status: Set(record.status.as_str().to_owned()),
            attempt_count: Set(record.attempt_count),
            max_retries: Set(record.max_retries),
            next_retry_at: Set(record.next_retry_at),
            last_error: Set(record.last_error.clone()),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
            sent_at: Set((record.status == NotificationStatus::Sent).then_some(record.updated_at)),
        };
        let inserted = notification_records::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    notification_records::Column::OrgId,
                    notification_records::Column::DedupeKey,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("insert notification record")?;
        Ok(inserted > 0)
    }

    async fn save(&self, record: &NotificationRecord) -> Result<(), BillingServiceError> {
        let mut model = notification_records::ActiveModel {
            id: Set(record.id),
            status: Set(record.status.as_str().to_owned()),
            attempt_count: Set(record.attempt_count),
            next_retry_at: Set(record.next_retry_at),
            last_error: Set(record.last_error.clone()),
            updated_at: Set(record.updated_at),
            ..Default::default()
        };
        if record.status == NotificationStatus::Sent {
            model.sent_at = Set(Some(record.updated_at));
        }
        model
            .update(&self.db)
            .await
            .context("save notification record")?;
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError> {
        let txn = self.db.begin().await.context("begin notification claim")?;
        let models = notification_records::Entity::find()
            .filter(notification_records::Column::Status.eq(NotificationStatus::Pending.as_str()))
            .filter(notification_records::Column::NextRetryAt.lte(now))
            .order_by_asc(notification_records::Column::NextRetryAt)
            .limit(limit)
            .for_update_skip_locked()
            .all(&txn)
            .await
            .context("lock due notifications")?;
        if models.is_empty() {
            txn.commit().await.context("commit notification claim")?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
        notification_records::Entity::update_many()
            .col_expr(
                notification_records::Column::NextRetryAt,
                Expr::value(lease_until),
            )
            .filter(notification_records::Column::Id.is_in(ids))
            .exec(&txn)
            .await
            .context("lease due notifications")?;
        txn.commit().await.context("commit notification claim")?;

        models
            .into_iter()
            .map(|m| {
                let mut record = notification_from_model(m)?;
                record.next_retry_at = Some(lease_until);
                Ok(record)
            })
            .collect()
    }

    async fn list_dead(
        &self,
        org_id: Option<OrgId>,
        page: PageRequest,
    ) -> Result<Vec<NotificationRecord>, BillingServiceError> {
        let mut query = notification_records::Entity::find()
            .filter(notification_records::Column::Status.eq(NotificationStatus::Dead.as_str()));
        if let Some(org_id) = org_id {
            query = query.filter(notification_records::Column::OrgId.eq(org_id.0));
        }
        let models = query
            .order_by_desc(notification_records::Column::UpdatedAt)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .context("list dead notifications")?;
        models.into_iter().map(notification_from_model).collect()
    }

    async fn revive_dead(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingServiceError> {
        let result = notification_records::Entity::update_many()
            .col_expr(
                notification_records::Column::Status,
                Expr::value(NotificationStatus::Pending.as_str()),
            )
            .col_expr(notification_records::Column::AttemptCount, Expr::value(0))
            .col_expr(notification_records::Column::NextRetryAt, Expr::value(now))
            .col_expr(
                notification_records::Column::LastError,
                Expr::value(Option::<String>::None),
            )
            .col_expr(notification_records::Column::UpdatedAt, Expr::value(now))
            .filter(notification_records::Column::Id.eq(id))
            .filter(notification_records::Column::Status.eq(NotificationStatus::Dead.as_str()))
            .exec(&self.db)
            .await
            .context("revive dead notification")?;
        Ok(result.rows_affected > 0)
    }
}

fn notification_from_model(
    model: notification_records::Model,
) -> Result<NotificationRecord, BillingServiceError> {
    let notification: Notification =
        serde_json::from_value(model.payload).context("decode notification payload")?;
    Ok(NotificationRecord {
        id: model.id,
        org_id: OrgId(model.org_id),
        dedupe_key: model.dedupe_key,
        notification,
        status: model.status.parse().context("decode notification status")?,
        attempt_count: model.attempt_count,
        max_retries: model.max_retries,
        next_retry_at: model.next_retry_at,
        last_error: model.last_error,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
