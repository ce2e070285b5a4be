use serde::Serialize;

use crate::domain::repository::EmailChannel;
use crate::domain::types::EmailMessage;
use crate::error::DeliveryError;
use crate::infra::http::{IDEMPOTENCY_KEY_HEADER, classify_reqwest_error, classify_status};

/// Transactional email over an HTTP API (`POST {api_url}` with a bearer key).
#[derive(Clone)]
pub struct HttpEmailChannel {
    pub client: reqwest::Client,
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl EmailChannel for HttpEmailChannel {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header(IDEMPOTENCY_KEY_HEADER, &message.idempotency_key)
            .json(&SendEmailRequest {
                from: &self.from,
                to: &message.to,
                subject: &message.subject,
                text: &message.body,
            })
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        classify_status(status).inspect_err(|e| {
            tracing::debug!(status = %status, error = %e, to = %message.to, "email api rejected send");
        })
    }
}
