use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Billing service domain error variants.
#[derive(Debug, thiserror::Error)]
pub enum BillingServiceError {
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed payload")]
    MalformedPayload,
    #[error("payload does not match the recorded event")]
    PayloadMismatch,
    #[error("outbox event not found")]
    OutboxEventNotFound,
    #[error("notification not found")]
    NotificationNotFound,
    #[error("item is not dead-lettered")]
    NotDeadLettered,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl BillingServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingSignature => "MISSING_SIGNATURE",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::PayloadMismatch => "PAYLOAD_MISMATCH",
            Self::OutboxEventNotFound => "OUTBOX_EVENT_NOT_FOUND",
            Self::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            Self::NotDeadLettered => "NOT_DEAD_LETTERED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Full `context: cause` chain of an internal error, for the server log only.
    pub fn internal_chain(&self) -> Option<String> {
        match self {
            Self::Internal(e) => Some(format!("{e:#}")),
            _ => None,
        }
    }
}

impl IntoResponse for BillingServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MissingSignature
            | Self::InvalidSignature
            | Self::MalformedPayload
            | Self::PayloadMismatch => StatusCode::BAD_REQUEST,
            Self::OutboxEventNotFound | Self::NotificationNotFound => StatusCode::NOT_FOUND,
            Self::NotDeadLettered => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // TraceLayer records every status; only the anyhow chain of a 500 is worth logging here.
        if let Some(chain) = self.internal_chain() {
            tracing::error!(error = %chain, kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Outcome of a failed channel call. Never crosses the HTTP boundary; it only decides
/// between rescheduling and dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Timeouts, connection failures, 429 and 5xx responses.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Rejected requests and undeliverable payloads; retrying cannot help.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}
