use axum::{
    Router,
    extract::Request,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use ledgerline_core::health::{healthz, readyz};
use ledgerline_core::middleware::{X_REQUEST_ID, propagate_request_id_layer, request_id_layer};

use crate::handlers::{
    dead_letter::{
        list_notification_dead_letters, list_outbox_dead_letters, list_stuck_webhooks,
        replay_notification, replay_outbox_event,
    },
    outbox::enqueue_outbox_event,
    webhook::receive_stripe_webhook,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Provider webhooks
        .route("/webhooks/stripe", post(receive_stripe_webhook))
        // Producer interface
        .route("/internal/outbox", post(enqueue_outbox_event))
        // Dead letters
        .route("/admin/dead-letters/outbox", get(list_outbox_dead_letters))
        .route(
            "/admin/dead-letters/outbox/{id}/replay",
            post(replay_outbox_event),
        )
        .route(
            "/admin/dead-letters/notifications",
            get(list_notification_dead_letters),
        )
        .route(
            "/admin/dead-letters/notifications/{id}/replay",
            post(replay_notification),
        )
        .route("/admin/webhooks/stuck", get(list_stuck_webhooks))
        .layer(
            ServiceBuilder::new()
                .layer(request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
                    let request_id = req
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http",
                        method = %req.method(),
                        uri = %req.uri(),
                        request_id,
                    )
                }))
                .layer(propagate_request_id_layer()),
        )
        .with_state(state)
}
