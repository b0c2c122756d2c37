use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Seconds subtracted from the provider's `expires_in` so a token is treated
/// as stale strictly before the provider stops accepting it.
pub const EXPIRY_SAFETY_MARGIN_SECS: u64 = 60;

/// Provider access token (short-lived bearer).
///
/// `Debug` is redacted; use [`expose`](AccessToken::expose) to read the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Provider refresh token (long-lived, may be rotated on use).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl RefreshToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Computes `issued_at + (expires_in - margin)` in epoch milliseconds.
#[must_use]
pub fn expiry_from(issued_at_ms: i64, expires_in_secs: u64) -> i64 {
    let usable = expires_in_secs.saturating_sub(EXPIRY_SAFETY_MARGIN_SECS);
    let usable_ms = i64::try_from(usable.saturating_mul(1000)).unwrap_or(i64::MAX);
    issued_at_ms.saturating_add(usable_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_applies_safety_margin() {
        assert_eq!(expiry_from(1_000, 3600), 1_000 + 3_540_000);
    }

    #[test]
    fn expiry_never_precedes_issue_time() {
        assert_eq!(expiry_from(5_000, 30), 5_000);
    }

    #[test]
    fn absurd_lifetime_saturates_instead_of_wrapping() {
        assert_eq!(expiry_from(0, u64::MAX), i64::MAX);
        assert!(expiry_from(now_millis(), u64::MAX / 10) > now_millis());
    }

    #[test]
    fn token_debug_is_redacted() {
        let access = AccessToken::new("secret-access");
        let refresh = RefreshToken::new("secret-refresh");

        assert!(!format!("{access:?}").contains("secret"));
        assert!(!format!("{refresh:?}").contains("secret"));
        assert_eq!(access.expose(), "secret-access");
    }

    #[test]
    fn tokens_serialize_transparently() {
        let token = AccessToken::from("abc".to_string());
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"abc\"");
    }
}
