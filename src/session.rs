use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::credentials::AppCredentials;
use crate::oauth::TokenResponse;
use crate::types::{AccessToken, RefreshToken, expiry_from};

/// Boxed error returned by [`SessionStore`] implementations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The durable record of one browser session's provider grant.
///
/// `expires_at` has no setter: it is derived from the provider's `expires_in`
/// every time a token is (re)issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
    expires_at: Option<i64>,
    credentials: Option<AppCredentials>,
}

impl SessionRecord {
    /// Build the record written after a successful code exchange.
    #[must_use]
    pub fn issue(grant: &TokenResponse, credentials: AppCredentials, issued_at_ms: i64) -> Self {
        Self {
            access_token: Some(AccessToken::new(&grant.access_token)),
            refresh_token: grant.refresh_token.as_deref().map(RefreshToken::new),
            expires_at: Some(expiry_from(issued_at_ms, grant.expires_in)),
            credentials: Some(credentials),
        }
    }

    /// Apply a refresh response: access token and expiry always change
    /// together, the refresh token only when the provider rotated it.
    #[must_use]
    pub fn refreshed(&self, grant: &TokenResponse, issued_at_ms: i64) -> Self {
        Self {
            access_token: Some(AccessToken::new(&grant.access_token)),
            refresh_token: grant
                .refresh_token
                .as_deref()
                .map(RefreshToken::new)
                .or_else(|| self.refresh_token.clone()),
            expires_at: Some(expiry_from(issued_at_ms, grant.expires_in)),
            credentials: self.credentials.clone(),
        }
    }

    /// Reassemble a record from persisted fields.
    pub(crate) fn restore(
        access_token: Option<AccessToken>,
        refresh_token: Option<RefreshToken>,
        expires_at: Option<i64>,
        credentials: Option<AppCredentials>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            credentials,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    /// Expiry in epoch milliseconds, already shortened by the safety margin.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&AppCredentials> {
        self.credentials.as_ref()
    }

    /// Access token present and not yet past `expires_at`.
    #[must_use]
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.access_token.is_some() && self.expires_at.is_some_and(|at| at > now_ms)
    }

    #[must_use]
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Neither an access token nor a refresh token.
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Pending authorization: the `state` nonce plus optional per-login
/// credentials supplied before any session exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub state: String,
    pub staged: Option<AppCredentials>,
}

/// Persistence for one browser session's [`SessionRecord`] and pending
/// [`NonceRecord`].
///
/// Every lifecycle operation re-reads the store instead of caching the
/// record, so interleaved requests observe each other's writes.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionStore for RedisSession {
///     async fn load(&self) -> Result<SessionRecord, StoreError> {
///         let raw: Option<String> = self.conn.get(&self.key).await?;
///         Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?.unwrap_or_default())
///     }
///     // ...
/// }
/// ```
pub trait SessionStore: Send + Sync {
    /// Read the current record. A missing session is an empty record.
    fn load(&self) -> impl Future<Output = Result<SessionRecord, StoreError>> + Send;

    /// Replace the record as a whole.
    fn save(&self, record: &SessionRecord)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove every field of the record.
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read the pending authorization, if any.
    fn load_nonce(&self) -> impl Future<Output = Result<Option<NonceRecord>, StoreError>> + Send;

    /// Stage a pending authorization, replacing any previous one.
    fn stage_nonce(&self, nonce: &NonceRecord)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop the pending authorization.
    fn clear_nonce(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    record: SessionRecord,
    nonce: Option<NonceRecord>,
}

/// In-process [`SessionStore`] holding exactly one session.
///
/// Clones share the same state. Useful for tests and single-user tools.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `record`.
    #[must_use]
    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState {
                record,
                nonce: None,
            })),
        }
    }
}

impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<SessionRecord, StoreError> {
        Ok(self.inner.lock().await.record.clone())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.inner.lock().await.record = record.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.lock().await.record = SessionRecord::default();
        Ok(())
    }

    async fn load_nonce(&self) -> Result<Option<NonceRecord>, StoreError> {
        Ok(self.inner.lock().await.nonce.clone())
    }

    async fn stage_nonce(&self, nonce: &NonceRecord) -> Result<(), StoreError> {
        self.inner.lock().await.nonce = Some(nonce.clone());
        Ok(())
    }

    async fn clear_nonce(&self) -> Result<(), StoreError> {
        self.inner.lock().await.nonce = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(access: &str, refresh: Option<&str>) -> TokenResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 3600,
        }))
        .unwrap()
    }

    fn creds() -> AppCredentials {
        AppCredentials::new("id", "secret")
    }

    #[test]
    fn issue_derives_expiry() {
        let record = SessionRecord::issue(&grant("a", Some("r")), creds(), 10_000);

        assert_eq!(record.expires_at(), Some(10_000 + 3_540_000));
        assert_eq!(record.access_token().map(AccessToken::expose), Some("a"));
        assert_eq!(record.refresh_token().map(RefreshToken::expose), Some("r"));
        assert_eq!(record.credentials(), Some(&creds()));
    }

    #[test]
    fn refresh_without_rotation_keeps_refresh_token() {
        let record = SessionRecord::issue(&grant("a", Some("r")), creds(), 0);
        let next = record.refreshed(&grant("b", None), 1_000);

        assert_eq!(next.access_token().map(AccessToken::expose), Some("b"));
        assert_eq!(next.refresh_token().map(RefreshToken::expose), Some("r"));
        assert_eq!(next.credentials(), Some(&creds()));
        assert!(next.expires_at() > record.expires_at());
    }

    #[test]
    fn refresh_with_rotation_replaces_refresh_token() {
        let record = SessionRecord::issue(&grant("a", Some("r")), creds(), 0);
        let next = record.refreshed(&grant("b", Some("r2")), 0);

        assert_eq!(next.refresh_token().map(RefreshToken::expose), Some("r2"));
    }

    #[test]
    fn freshness_classification() {
        let record = SessionRecord::issue(&grant("a", Some("r")), creds(), 0);
        let expires_at = record.expires_at().unwrap();

        assert!(record.is_fresh(expires_at - 1));
        assert!(!record.is_fresh(expires_at));
        assert!(record.is_refreshable());
        assert!(!record.is_unauthenticated());

        let empty = SessionRecord::default();
        assert!(empty.is_unauthenticated());
        assert!(!empty.is_fresh(0));
    }

    #[test]
    fn missing_expiry_is_stale() {
        let record = SessionRecord::restore(Some(AccessToken::new("a")), None, None, None);
        assert!(!record.is_fresh(0));
        assert!(!record.is_refreshable());
    }

    #[tokio::test]
    async fn memory_store_roundtrip_and_clear() {
        let store = MemorySessionStore::new();
        let record = SessionRecord::issue(&grant("a", Some("r")), creds(), 0);

        store.save(&record).await.unwrap();
        assert_eq!(store.load().await.unwrap(), record);

        let nonce = NonceRecord {
            state: "s".into(),
            staged: Some(creds()),
        };
        store.stage_nonce(&nonce).await.unwrap();
        assert_eq!(store.load_nonce().await.unwrap(), Some(nonce));

        store.clear().await.unwrap();
        store.clear_nonce().await.unwrap();
        assert!(store.load().await.unwrap().is_unauthenticated());
        assert!(store.load_nonce().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_clones_share_state() {
        let store = MemorySessionStore::new();
        let other = store.clone();
        let record = SessionRecord::issue(&grant("a", None), creds(), 0);

        store.save(&record).await.unwrap();
        assert_eq!(other.load().await.unwrap(), record);
    }
}
