use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, Insert, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, ExprTrait, OnConflict},
};

use ledgerline_billing_schema::{bookings, inbound_webhook_events, invoices, payments};
use ledgerline_domain::id::{BookingId, InvoiceId, OrgId};

use crate::domain::repository::{LedgerRepository, LedgerTransaction};
use crate::domain::types::{
    BillableAggregate, InboundClaim, InboundWebhookEvent, NewOutboxEvent, OutboxEvent, Payment,
    PaymentTarget, SettlementStatus, WebhookReceipt, WebhookStatus,
};
use crate::error::BillingServiceError;
use crate::infra::db::enqueue_outbox_event;

#[derive(Clone)]
pub struct DbLedgerRepository {
    pub db: DatabaseConnection,
}

impl LedgerRepository for DbLedgerRepository {
    type Tx = DbLedgerTransaction;

    async fn begin(&self) -> Result<DbLedgerTransaction, BillingServiceError> {
        let txn = self.db.begin().await.context("begin ledger transaction")?;
        Ok(DbLedgerTransaction { txn })
    }

    async fn record_failure(
        &self,
        receipt: &WebhookReceipt,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError> {
        failure_upsert(receipt, error, now)
            .exec_without_returning(&self.db)
            .await
            .context("record webhook failure")?;
        Ok(())
    }

    async fn list_stuck(
        &self,
        stale_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<InboundWebhookEvent>, BillingServiceError> {
        let models = inbound_webhook_events::Entity::find()
            .filter(
                inbound_webhook_events::Column::Status.eq(WebhookStatus::Processing.as_str()),
            )
            .filter(inbound_webhook_events::Column::UpdatedAt.lt(stale_before))
            .order_by_asc(inbound_webhook_events::Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list stuck webhook events")?;
        models.into_iter().map(inbound_from_model).collect()
    }
}

/// Upsert that marks an event as errored. Rows that already finished keep their status.
fn failure_upsert(
    receipt: &WebhookReceipt,
    error: &str,
    now: DateTime<Utc>,
) -> Insert<inbound_webhook_events::ActiveModel> {
    let model = inbound_webhook_events::ActiveModel {
        event_id: Set(receipt.event_id.clone()),
        provider: Set(receipt.provider.clone()),
        event_type: Set(receipt.event_type.clone()),
        payload_hash: Set(receipt.payload_hash.clone()),
        status: Set(WebhookStatus::Error.as_str().to_owned()),
        last_error: Set(Some(error.to_owned())),
        received_at: Set(now),
        updated_at: Set(now),
        processed_at: Set(None),
    };
    let finished = [WebhookStatus::Succeeded.as_str(), WebhookStatus::Ignored.as_str()];
    inbound_webhook_events::Entity::insert(model).on_conflict(
        OnConflict::column(inbound_webhook_events::Column::EventId)
            .update_columns([
                inbound_webhook_events::Column::Status,
                inbound_webhook_events::Column::LastError,
                inbound_webhook_events::Column::UpdatedAt,
            ])
            .action_and_where(
                Expr::col((
                    inbound_webhook_events::Entity,
                    inbound_webhook_events::Column::Status,
                ))
                .is_not_in(finished),
            )
            .to_owned(),
    )
}

/// One webhook delivery's transaction. Dropping it rolls back.
pub struct DbLedgerTransaction {
    txn: DatabaseTransaction,
}

impl DbLedgerTransaction {
    async fn lock_inbound(
        &self,
        event_id: &str,
    ) -> Result<Option<InboundWebhookEvent>, BillingServiceError> {
        let model = inbound_webhook_events::Entity::find_by_id(event_id.to_owned())
            .lock_exclusive()
            .one(&self.txn)
            .await
            .context("lock inbound webhook event")?;
        model.map(inbound_from_model).transpose()
    }
}

impl LedgerTransaction for DbLedgerTransaction {
    async fn claim_inbound(
        &mut self,
        receipt: &WebhookReceipt,
        now: DateTime<Utc>,
    ) -> Result<InboundClaim, BillingServiceError> {
        if let Some(existing) = self.lock_inbound(&receipt.event_id).await? {
            return Ok(InboundClaim::Existing(existing));
        }

        let model = inbound_webhook_events::ActiveModel {
            event_id: Set(receipt.event_id.clone()),
            provider: Set(receipt.provider.clone()),
            event_type: Set(receipt.event_type.clone()),
            payload_hash: Set(receipt.payload_hash.clone()),
            status: Set(WebhookStatus::Processing.as_str().to_owned()),
            last_error: Set(None),
            received_at: Set(now),
            updated_at: Set(now),
            processed_at: Set(None),
        };
        let inserted = inbound_webhook_events::Entity::insert(model)
            .on_conflict(
                OnConflict::column(inbound_webhook_events::Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await
            .context("insert inbound webhook event")?;
        if inserted > 0 {
            return Ok(InboundClaim::Fresh);
        }

        // A concurrent first delivery committed between our lookup and insert.
        let existing = self
            .lock_inbound(&receipt.event_id)
            .await?
            .with_context(|| format!("inbound event {} missing after conflict", receipt.event_id))?;
        Ok(InboundClaim::Existing(existing))
    }

    async fn set_inbound_status(
        &mut self,
        event_id: &str,
        status: WebhookStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError> {
        let finished = matches!(status, WebhookStatus::Succeeded | WebhookStatus::Ignored);
        let model = inbound_webhook_events::ActiveModel {
            event_id: Set(event_id.to_owned()),
            status: Set(status.as_str().to_owned()),
            last_error: Set(error.map(str::to_owned)),
            updated_at: Set(now),
            processed_at: Set(finished.then_some(now)),
            ..Default::default()
        };
        model
            .update(&self.txn)
            .await
            .context("update inbound webhook status")?;
        Ok(())
    }

    async fn lock_aggregate(
        &mut self,
        target: &PaymentTarget,
    ) -> Result<Option<BillableAggregate>, BillingServiceError> {
        match target {
            PaymentTarget::Invoice(id) => {
                let Some(model) = invoices::Entity::find_by_id(id.0.clone())
                    .lock_exclusive()
                    .one(&self.txn)
                    .await
                    .context("lock invoice")?
                else {
                    return Ok(None);
                };
                Ok(Some(BillableAggregate {
                    target: target.clone(),
                    org_id: OrgId(model.org_id),
                    customer_email: model.customer_email,
                    owed_cents: model.total_cents,
                    currency: model.currency,
                    status: model.status.parse().context("decode invoice status")?,
                }))
            }
            PaymentTarget::Booking(id) => {
                let Some(model) = bookings::Entity::find_by_id(id.0.clone())
                    .lock_exclusive()
                    .one(&self.txn)
                    .await
                    .context("lock booking")?
                else {
                    return Ok(None);
                };
                Ok(Some(BillableAggregate {
                    target: target.clone(),
                    org_id: OrgId(model.org_id),
                    customer_email: model.customer_email,
                    owed_cents: model.deposit_cents,
                    currency: model.currency,
                    status: model
                        .deposit_status
                        .parse()
                        .context("decode booking deposit status")?,
                }))
            }
        }
    }

    async fn find_payment_by_provider_ref(
        &mut self,
        provider: &str,
        provider_ref: &str,
    ) -> Result<Option<Payment>, BillingServiceError> {
        let model = payments::Entity::find()
            .filter(payments::Column::Provider.eq(provider))
            .filter(payments::Column::ProviderRef.eq(provider_ref))
            .one(&self.txn)
            .await
            .context("find payment by provider ref")?;
        model.map(payment_from_model).transpose()
    }

    async fn find_payment_by_checkout_session(
        &mut self,
        target: &PaymentTarget,
        checkout_session_id: &str,
    ) -> Result<Option<Payment>, BillingServiceError> {
        let model = payments::Entity::find()
            .filter(target_filter(target))
            .filter(payments::Column::CheckoutSessionId.eq(checkout_session_id))
            .one(&self.txn)
            .await
            .context("find payment by checkout session")?;
        model.map(payment_from_model).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<bool, BillingServiceError> {
        let model = payments::ActiveModel {
            id: Set(payment.id),
            invoice_id: Set(payment.target.invoice_id().map(|id| id.0.clone())),
            booking_id: Set(payment.target.booking_id().map(|id| id.0.clone())),
            provider: Set(payment.provider.clone()),
            provider_ref: Set(payment.provider_ref.clone()),
            checkout_session_id: Set(payment.checkout_session_id.clone()),
            amount_cents: Set(payment.amount_cents),
            currency: Set(payment.currency.clone()),
            status: Set(payment.status.as_str().to_owned()),
            received_at: Set(payment.received_at),
            updated_at: Set(payment.received_at),
        };
        // No conflict target: any of the partial unique indexes may fire.
        let inserted = payments::Entity::insert(model)
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .exec_without_returning(&self.txn)
            .await
            .context("insert payment")?;
        Ok(inserted > 0)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), BillingServiceError> {
        let model = payments::ActiveModel {
            id: Set(payment.id),
            provider_ref: Set(payment.provider_ref.clone()),
            checkout_session_id: Set(payment.checkout_session_id.clone()),
            amount_cents: Set(payment.amount_cents),
            currency: Set(payment.currency.clone()),
            status: Set(payment.status.as_str().to_owned()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        model.update(&self.txn).await.context("update payment")?;
        Ok(())
    }

    async fn list_payments(
        &mut self,
        target: &PaymentTarget,
    ) -> Result<Vec<Payment>, BillingServiceError> {
        let models = payments::Entity::find()
            .filter(target_filter(target))
            .order_by_asc(payments::Column::ReceivedAt)
            .all(&self.txn)
            .await
            .context("list payments")?;
        models.into_iter().map(payment_from_model).collect()
    }

    async fn set_aggregate_status(
        &mut self,
        target: &PaymentTarget,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<(), BillingServiceError> {
        match target {
            PaymentTarget::Invoice(id) => {
                invoices::Entity::update_many()
                    .col_expr(invoices::Column::Status, Expr::value(status.as_str()))
                    .col_expr(invoices::Column::UpdatedAt, Expr::value(now))
                    .filter(invoices::Column::Id.eq(id.0.as_str()))
                    .exec(&self.txn)
                    .await
                    .context("update invoice status")?;
            }
            PaymentTarget::Booking(id) => {
                bookings::Entity::update_many()
                    .col_expr(bookings::Column::DepositStatus, Expr::value(status.as_str()))
                    .col_expr(bookings::Column::UpdatedAt, Expr::value(now))
                    .filter(bookings::Column::Id.eq(id.0.as_str()))
                    .exec(&self.txn)
                    .await
                    .context("update booking deposit status")?;
            }
        }
        Ok(())
    }

    async fn enqueue_outbox(
        &mut self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, BillingServiceError> {
        enqueue_outbox_event(&self.txn, event, now).await
    }

    async fn commit(self) -> Result<(), BillingServiceError> {
        self.txn.commit().await.context("commit ledger transaction")?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), BillingServiceError> {
        self.txn
            .rollback()
            .await
            .context("roll back ledger transaction")?;
        Ok(())
    }
}

fn target_filter(target: &PaymentTarget) -> sea_orm::sea_query::SimpleExpr {
    match target {
        PaymentTarget::Invoice(id) => payments::Column::InvoiceId.eq(id.0.as_str()),
        PaymentTarget::Booking(id) => payments::Column::BookingId.eq(id.0.as_str()),
    }
}

fn payment_from_model(model: payments::Model) -> Result<Payment, BillingServiceError> {
    let target = match (model.invoice_id, model.booking_id) {
        (Some(invoice_id), _) => PaymentTarget::Invoice(InvoiceId(invoice_id)),
        (None, Some(booking_id)) => PaymentTarget::Booking(BookingId(booking_id)),
        (None, None) => {
            return Err(anyhow::anyhow!("payment {} has no invoice or booking", model.id).into());
        }
    };
    Ok(Payment {
        id: model.id,
        target,
        provider: model.provider,
        provider_ref: model.provider_ref,
        checkout_session_id: model.checkout_session_id,
        amount_cents: model.amount_cents,
        currency: model.currency,
        status: model.status.parse().context("decode payment status")?,
        received_at: model.received_at,
    })
}

fn inbound_from_model(
    model: inbound_webhook_events::Model,
) -> Result<InboundWebhookEvent, BillingServiceError> {
    Ok(InboundWebhookEvent {
        event_id: model.event_id,
        provider: model.provider,
        event_type: model.event_type,
        payload_hash: model.payload_hash,
        status: model.status.parse().context("decode webhook status")?,
        last_error: model.last_error,
        received_at: model.received_at,
        updated_at: model.updated_at,
    })
}
