use std::str::FromStr;

use crate::domain::policy::DeliveryPolicy;

/// Billing service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Shared secret for verifying `Stripe-Signature` headers.
    pub stripe_webhook_secret: String,
    /// TCP port to listen on (default 3120). Env var: `BILLING_PORT`.
    pub billing_port: u16,
    /// Maximum age of a signed webhook timestamp, in seconds (default 300).
    pub signature_tolerance_secs: i64,
    /// Retry policy for outbox events.
    pub outbox_policy: DeliveryPolicy,
    pub outbox_batch_size: u64,
    pub outbox_poll_interval_ms: u64,
    /// Retry policy for notification records.
    pub notification_policy: DeliveryPolicy,
    pub notification_batch_size: u64,
    pub notification_sweep_interval_ms: u64,
    /// Transactional email API endpoint (e.g. "https://api.mailer.example/v1/send").
    pub email_api_url: String,
    pub email_api_key: String,
    /// Sender address for customer notifications.
    pub email_from: String,
    /// HMAC secret for `X-Ledgerline-Signature` on outbound webhooks. Unsigned when unset.
    pub outbound_signing_secret: Option<String>,
    /// Hosts export targets may point at. Empty denies every export.
    pub export_allowed_hosts: Vec<String>,
    /// Timeout for every outbound adapter call, in milliseconds (default 10000).
    pub adapter_timeout_ms: u64,
    /// Age after which a `processing` inbound webhook is reported as stuck (default 900).
    pub stuck_webhook_ttl_secs: i64,
    pub watchdog_interval_secs: u64,
}

impl BillingConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            stripe_webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .expect("STRIPE_WEBHOOK_SECRET"),
            billing_port: env_or("BILLING_PORT", 3120),
            signature_tolerance_secs: env_or("SIGNATURE_TOLERANCE_SECS", 300),
            outbox_policy: DeliveryPolicy {
                max_attempts: env_or("OUTBOX_MAX_ATTEMPTS", 8),
                base_backoff_secs: env_or("OUTBOX_BASE_BACKOFF_SECS", 30),
            },
            outbox_batch_size: env_or("OUTBOX_BATCH_SIZE", 50),
            outbox_poll_interval_ms: env_or("OUTBOX_POLL_INTERVAL_MS", 1000),
            notification_policy: DeliveryPolicy {
                max_attempts: env_or("NOTIFICATION_MAX_RETRIES", 5),
                base_backoff_secs: env_or("NOTIFICATION_BASE_BACKOFF_SECS", 60),
            },
            notification_batch_size: env_or("NOTIFICATION_BATCH_SIZE", 50),
            notification_sweep_interval_ms: env_or("NOTIFICATION_SWEEP_INTERVAL_MS", 5000),
            email_api_url: std::env::var("EMAIL_API_URL").expect("EMAIL_API_URL"),
            email_api_key: std::env::var("EMAIL_API_KEY").expect("EMAIL_API_KEY"),
            email_from: std::env::var("EMAIL_FROM").expect("EMAIL_FROM"),
            outbound_signing_secret: std::env::var("OUTBOUND_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            export_allowed_hosts: parse_host_list(
                &std::env::var("EXPORT_ALLOWED_HOSTS").unwrap_or_default(),
            ),
            adapter_timeout_ms: env_or("ADAPTER_TIMEOUT_MS", 10_000),
            stuck_webhook_ttl_secs: env_or("STUCK_WEBHOOK_TTL_SECS", 900),
            watchdog_interval_secs: env_or("WATCHDOG_INTERVAL_SECS", 60),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated host list, trimming and lowercasing each entry.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}
