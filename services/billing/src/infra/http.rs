use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::Sha256;

use crate::domain::repository::WebhookChannel;
use crate::domain::types::OutboundRequest;
use crate::error::DeliveryError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
pub const SIGNATURE_HEADER: &str = "X-Ledgerline-Signature";

/// POSTs outbox webhook/export payloads. The client carries the adapter timeout.
#[derive(Clone)]
pub struct ReqwestWebhookChannel {
    pub client: reqwest::Client,
    pub signing_secret: Option<String>,
}

impl WebhookChannel for ReqwestWebhookChannel {
    async fn post(&self, request: &OutboundRequest) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&request.body)
            .map_err(|e| DeliveryError::Permanent(format!("encode body: {e}")))?;

        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(IDEMPOTENCY_KEY_HEADER, &request.idempotency_key)
            .header(EVENT_TYPE_HEADER, &request.event_type);
        if let Some(secret) = &self.signing_secret {
            builder = builder.header(SIGNATURE_HEADER, sign_body(secret, &body)?);
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        classify_status(response.status())
    }
}

/// `sha256=<hex hmac>` over the exact bytes sent.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| DeliveryError::Permanent(format!("signing key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// 2xx delivered; 408/429/5xx retried; any other status will not change on retry.
pub fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(DeliveryError::Transient(format!("http status {status}")))
    } else {
        Err(DeliveryError::Permanent(format!("http status {status}")))
    }
}

pub fn classify_reqwest_error(error: &reqwest::Error) -> DeliveryError {
    if error.is_builder() {
        DeliveryError::Permanent(format!("invalid request: {error}"))
    } else if error.is_timeout() {
        DeliveryError::Transient(format!("timed out: {error}"))
    } else {
        DeliveryError::Transient(error.to_string())
    }
}
