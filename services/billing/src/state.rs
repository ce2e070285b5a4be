use std::sync::Arc;

use axum::extract::FromRef;
use sea_orm::DatabaseConnection;

use crate::config::BillingConfig;
use crate::infra::db::{DbNotificationRepository, DbOutboxRepository};
use crate::infra::email::HttpEmailChannel;
use crate::infra::http::ReqwestWebhookChannel;
use crate::infra::ledger::DbLedgerRepository;
use crate::signature::StripeSignatureVerifier;
use crate::usecase::dispatch::OutboxDeliveryRouter;
use crate::usecase::notification::AttemptSendUseCase;

/// Shared application state passed to every handler and background loop.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    /// Outbound client; built with the adapter timeout.
    pub http: reqwest::Client,
    pub config: Arc<BillingConfig>,
}

impl FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl AppState {
    pub fn outbox_repo(&self) -> DbOutboxRepository {
        DbOutboxRepository {
            db: self.db.clone(),
        }
    }

    pub fn ledger_repo(&self) -> DbLedgerRepository {
        DbLedgerRepository {
            db: self.db.clone(),
        }
    }

    pub fn notification_repo(&self) -> DbNotificationRepository {
        DbNotificationRepository {
            db: self.db.clone(),
        }
    }

    pub fn email_channel(&self) -> HttpEmailChannel {
        HttpEmailChannel {
            client: self.http.clone(),
            api_url: self.config.email_api_url.clone(),
            api_key: self.config.email_api_key.clone(),
            from: self.config.email_from.clone(),
        }
    }

    pub fn webhook_channel(&self) -> ReqwestWebhookChannel {
        ReqwestWebhookChannel {
            client: self.http.clone(),
            signing_secret: self.config.outbound_signing_secret.clone(),
        }
    }

    pub fn attempt_send(&self) -> AttemptSendUseCase<DbNotificationRepository, HttpEmailChannel> {
        AttemptSendUseCase {
            notifications: self.notification_repo(),
            channel: self.email_channel(),
            policy: self.config.notification_policy,
        }
    }

    pub fn delivery_router(
        &self,
    ) -> OutboxDeliveryRouter<DbNotificationRepository, HttpEmailChannel, ReqwestWebhookChannel>
    {
        OutboxDeliveryRouter {
            email: self.attempt_send(),
            webhook: self.webhook_channel(),
            export_allowed_hosts: self.config.export_allowed_hosts.clone(),
        }
    }

    pub fn signature_verifier(&self) -> StripeSignatureVerifier {
        StripeSignatureVerifier::new(
            self.config.stripe_webhook_secret.clone(),
            self.config.signature_tolerance_secs,
        )
    }
}
