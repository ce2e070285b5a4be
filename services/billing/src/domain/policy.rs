use chrono::{DateTime, Duration, Utc};

/// Retry budget shared by the outbox dispatcher and the notification sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Attempts after which a failing item is dead-lettered.
    pub max_attempts: i32,
    pub base_backoff_secs: i64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_secs: 30,
        }
    }
}

impl DeliveryPolicy {
    /// `base_backoff_secs × 2^(attempts-1)`. Attempts below 1 count as 1.
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        // 2^30 already exceeds any sane retry window; cap the shift so it cannot overflow.
        let exponent = (attempts.max(1) - 1).min(30) as u32;
        let secs = self.base_backoff_secs.saturating_mul(1_i64 << exponent);
        Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }

    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
        now.checked_add_signed(self.backoff_delay(attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}
