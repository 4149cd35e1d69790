//! Access token inspection.
//!
//! Expiry is read from the `exp` claim of the token payload on every call;
//! nothing is cached, so a replaced token is always judged on its own claim.
//! A token that cannot be decoded has no expiry and counts as expired.

use base64::engine::general_purpose::{URL_SAFE_NO_PAD, STANDARD_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Buffer before expiry at which a token is considered "expiring soon" (5 minutes)
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<f64>,
}

/// Absolute expiry of `token`, or `None` if the token is malformed or has no `exp`.
pub fn expiry_of(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.exp?;
    if !exp.is_finite() || exp <= 0.0 {
        return None;
    }
    Utc.timestamp_opt(exp as i64, 0).single()
}

pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match expiry_of(token) {
        Some(expiry) => now >= expiry,
        None => true,
    }
}

pub fn is_expiring_soon(token: &str, now: DateTime<Utc>, margin: Duration) -> bool {
    match expiry_of(token) {
        Some(expiry) => now >= expiry - margin,
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::{DateTime, Utc};

    /// Build an unsigned JWT-shaped token expiring at `exp`
    pub fn token_expiring_at(exp: DateTime<Utc>) -> String {
        token_with_payload(&format!(r#"{{"sub":"admin","exp":{}}}"#, exp.timestamp()))
    }

    pub fn token_with_payload(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{}.{}.signature", header, body)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_expiry_of_reads_exp_claim() {
        let token = token_expiring_at(now() + Duration::seconds(3600));
        assert_eq!(expiry_of(&token), Some(now() + Duration::seconds(3600)));
    }

    #[test]
    fn test_is_expired_past_and_future() {
        let past = token_expiring_at(now() - Duration::seconds(1));
        let future = token_expiring_at(now() + Duration::seconds(3600));
        assert!(is_expired(&past, now()));
        assert!(!is_expired(&future, now()));
    }

    #[test]
    fn test_is_expired_at_exact_expiry() {
        let token = token_expiring_at(now());
        assert!(is_expired(&token, now()));
    }

    #[test]
    fn test_undecodable_token_is_expired() {
        assert!(is_expired("not-a-jwt", now()));
        assert!(is_expired("a.%%%.c", now()));
        assert!(is_expired("", now()));
        assert!(is_expiring_soon("garbage", now(), Duration::seconds(300)));
        assert_eq!(expiry_of("a.b"), None);
    }

    #[test]
    fn test_missing_exp_claim_is_expired() {
        let token = token_with_payload(r#"{"sub":"admin"}"#);
        assert_eq!(expiry_of(&token), None);
        assert!(is_expired(&token, now()));
    }

    #[test]
    fn test_non_numeric_exp_is_expired() {
        let token = token_with_payload(r#"{"exp":"tomorrow"}"#);
        assert!(is_expired(&token, now()));
    }

    #[test]
    fn test_padded_payload_accepted() {
        let header = URL_SAFE_NO_PAD.encode("{}");
        let payload = base64::engine::general_purpose::URL_SAFE
            .encode(format!(r#"{{"exp":{}}}"#, now().timestamp() + 60));
        let token = format!("{}.{}.sig", header, payload);
        assert_eq!(expiry_of(&token), Some(now() + Duration::seconds(60)));
    }

    #[test]
    fn test_is_expiring_soon_margin() {
        let margin = Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS);
        let soon = token_expiring_at(now() + Duration::seconds(299));
        let boundary = token_expiring_at(now() + Duration::seconds(300));
        let later = token_expiring_at(now() + Duration::seconds(301));
        assert!(is_expiring_soon(&soon, now(), margin));
        assert!(is_expiring_soon(&boundary, now(), margin));
        assert!(!is_expiring_soon(&later, now(), margin));
    }
}
