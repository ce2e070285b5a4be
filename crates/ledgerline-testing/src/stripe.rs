//! Builds `Stripe-Signature` header values the way the provider does.
//!
//! Kept separate from the service's verifier so tests check the wire format,
//! not the verifier against itself.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing secret used by service tests.
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret_for_unit_tests_only";

/// `t=<timestamp>,v1=<hex hmac-sha256 of "{timestamp}.{payload}">`
pub fn signed_header(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Header signed with [`TEST_WEBHOOK_SECRET`] at the current time.
pub fn signed_header_now(payload: &[u8]) -> String {
    signed_header(TEST_WEBHOOK_SECRET, payload, chrono::Utc::now().timestamp())
}
