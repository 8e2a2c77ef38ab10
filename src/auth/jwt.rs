//! JWT inspection without signature verification.
//!
//! The backend owns signing keys; the client only needs the claims to decide
//! when a token should be refreshed. Every function here degrades to
//! "expired" on malformed input instead of failing.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default proactive refresh window (6 minutes).
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(360);

/// base64url, padding optional.
const JWT_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims carried in the payload segment of an access or refresh token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID); numeric subjects are kept as their decimal string
    #[serde(default, deserialize_with = "lenient_string")]
    pub sub: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,

    /// Issued at
    #[serde(default, deserialize_with = "numeric_date")]
    pub iat: Option<i64>,

    /// Expiration, seconds since epoch
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,

    /// Any other claims the backend adds
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Strings pass through, numbers are stringified, anything else is dropped.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// NumericDate per RFC 7519 may carry a fractional part.
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite()).map(|v| v.floor() as i64))
}

/// Decode the payload segment of a JWT.
///
/// Returns `None` when the token does not have three segments, the payload
/// is not base64url, or it is not a JSON object.
pub fn decode_token(token: &str) -> Option<TokenClaims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() || payload.is_empty() {
        return None;
    }

    let bytes = JWT_SEGMENT.decode(payload).ok()?;
    match serde_json::from_slice::<TokenClaims>(&bytes) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!("Token payload is not valid JSON claims: {}", e);
            None
        }
    }
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn expiry(token: &str) -> Option<i64> {
    decode_token(token)?.exp
}

/// `true` if the token cannot be decoded or `exp` lies before `now`.
pub fn is_token_expired_at(token: &str, now: i64) -> bool {
    match expiry(token) {
        Some(exp) => exp < now,
        None => true,
    }
}

pub fn is_token_expired(token: &str) -> bool {
    is_token_expired_at(token, now_secs())
}

/// `true` if the token cannot be decoded or expires within `buffer` of `now`.
pub fn is_token_expiring_soon_at(token: &str, buffer: Duration, now: i64) -> bool {
    match expiry(token) {
        Some(exp) => exp.saturating_sub(now) < buffer.as_secs() as i64,
        None => true,
    }
}

pub fn is_token_expiring_soon(token: &str, buffer: Duration) -> bool {
    is_token_expiring_soon_at(token, buffer, now_secs())
}

/// Seconds until expiry, clamped at zero. Undecodable tokens report `0`.
pub fn token_time_remaining_at(token: &str, now: i64) -> u64 {
    match expiry(token) {
        Some(exp) if exp > now => (exp - now) as u64,
        _ => 0,
    }
}

pub fn token_time_remaining(token: &str) -> u64 {
    token_time_remaining_at(token, now_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    const NOW: i64 = 1_750_000_000;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    fn token_expiring_at(exp: i64) -> String {
        token_with_payload(&format!(r#"{{"sub":"user-1","exp":{}}}"#, exp))
    }

    #[test]
    fn test_decode_valid_token() {
        let token = token_with_payload(
            r#"{"sub":"42","role":"admin","iat":1,"exp":2,"plan":"gold"}"#,
        );
        let claims = decode_token(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("42"));
        assert_eq!(claims.iat, Some(1));
        assert_eq!(claims.exp, Some(2));
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert!(claims.email.is_none());
        assert!(!claims.extra.contains_key("role"));
        assert_eq!(claims.extra.get("plan"), Some(&serde_json::json!("gold")));
    }

    #[test]
    fn test_decode_numeric_subject_and_fractional_exp() {
        let token = token_with_payload(r#"{"sub":7,"exp":1750000000.75}"#);
        let claims = decode_token(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("7"));
        assert_eq!(claims.exp, Some(1_750_000_000));
    }

    #[test]
    fn test_decode_tolerates_odd_identity_claims() {
        let token = token_with_payload(
            r#"{"sub":null,"email":"ade@example.com","role":["admin"],"exp":5}"#,
        );
        let claims = decode_token(&token).unwrap();
        assert!(claims.sub.is_none());
        assert_eq!(claims.email.as_deref(), Some("ade@example.com"));
        assert!(claims.role.is_none());
        assert_eq!(claims.exp, Some(5));
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":10}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_token(&token).unwrap().exp, Some(10));
    }

    #[test]
    fn test_decode_malformed_tokens() {
        assert!(decode_token("").is_none());
        assert!(decode_token("not.a.jwt").is_none());
        assert!(decode_token("onlyone").is_none());
        assert!(decode_token("two.segments").is_none());
        assert!(decode_token("a..c").is_none());
        assert!(decode_token("a.b.c.d").is_none());
        assert!(decode_token(&token_with_payload("[1,2,3]")).is_none());
        assert!(decode_token(&token_with_payload("not json")).is_none());
    }

    #[test]
    fn test_is_token_expired() {
        assert!(is_token_expired_at(&token_expiring_at(NOW - 1), NOW));
        assert!(!is_token_expired_at(&token_expiring_at(NOW), NOW));
        assert!(!is_token_expired_at(&token_expiring_at(NOW + 3600), NOW));
        assert!(is_token_expired_at("garbage", NOW));
        assert!(is_token_expired_at(&token_with_payload(r#"{"sub":"x"}"#), NOW));
    }

    #[test]
    fn test_is_token_expiring_soon() {
        let buffer = DEFAULT_REFRESH_BUFFER;
        assert!(is_token_expiring_soon_at(&token_expiring_at(NOW + 100), buffer, NOW));
        assert!(is_token_expiring_soon_at(&token_expiring_at(NOW + 359), buffer, NOW));
        assert!(!is_token_expiring_soon_at(&token_expiring_at(NOW + 360), buffer, NOW));
        assert!(!is_token_expiring_soon_at(&token_expiring_at(NOW + 3600), buffer, NOW));
        assert!(is_token_expiring_soon_at("not.a.jwt", buffer, NOW));
    }

    #[test]
    fn test_token_time_remaining() {
        assert_eq!(token_time_remaining_at(&token_expiring_at(NOW + 90), NOW), 90);
        assert_eq!(token_time_remaining_at(&token_expiring_at(NOW - 90), NOW), 0);
        assert_eq!(token_time_remaining_at("", NOW), 0);
    }

    #[test]
    fn test_wall_clock_variants() {
        let fresh = token_expiring_at(Utc::now().timestamp() + 3600);
        assert!(!is_token_expired(&fresh));
        assert!(!is_token_expiring_soon(&fresh, DEFAULT_REFRESH_BUFFER));
        assert!(token_time_remaining(&fresh) > 3500);
    }
}
