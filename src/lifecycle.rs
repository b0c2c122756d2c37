use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::credentials::{
    AppCredentials, CredentialCandidates, CredentialSource, resolve_credentials,
};
use crate::error::Error;
use crate::nonce;
use crate::oauth::{AuthClient, TokenEndpointError, TokenResponse};
use crate::session::{NonceRecord, SessionRecord, SessionStore, StoreError};
use crate::types::{AccessToken, RefreshToken, now_millis};

/// Consent URL plus the nonce staged for it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of [`TokenLifecycle::ensure_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The stored access token is still valid; nothing was sent.
    Current(SessionRecord),
    /// A refresh was performed and persisted.
    Refreshed(SessionRecord),
    /// The access token is expired and there is no refresh token.
    Stale(SessionRecord),
    /// No tokens at all.
    Unauthenticated,
}

impl Freshness {
    #[must_use]
    pub fn record(&self) -> Option<&SessionRecord> {
        match self {
            Self::Current(record) | Self::Refreshed(record) | Self::Stale(record) => Some(record),
            Self::Unauthenticated => None,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.record().and_then(SessionRecord::access_token)
    }
}

/// Snapshot answering "does the browser need to refresh or log in?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub needs_refresh: bool,
    pub needs_login: bool,
    pub expires_at: i64,
    pub current_time: i64,
}

/// Outcome of one token-endpoint refresh call, shared with concurrent waiters.
type SharedRefresh = (i64, Result<TokenResponse, TokenEndpointError>);
type RefreshSlot = Arc<Mutex<Option<SharedRefresh>>>;
type SlotRegistry = std::sync::Mutex<HashMap<String, SlotEntry>>;

/// How long a settled refresh is replayed to requests still carrying the
/// refresh token it consumed.
const REFRESH_REUSE_WINDOW_MS: i64 = 10_000;

#[derive(Debug)]
struct SlotEntry {
    slot: RefreshSlot,
    settled_at: Option<i64>,
}

impl SlotEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        Arc::strong_count(&self.slot) > 1
            || self
                .settled_at
                .is_some_and(|at| now_ms - at < REFRESH_REUSE_WINDOW_MS)
    }
}

fn registry(in_flight: &SlotRegistry) -> MutexGuard<'_, HashMap<String, SlotEntry>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settles or drops the registry entry of the slot a caller refreshed
/// through. Runs on drop so a cancelled refresh frees its slot too.
struct SlotRelease<'a> {
    in_flight: &'a SlotRegistry,
    key: String,
    slot: RefreshSlot,
    settled: bool,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        let mut in_flight = registry(self.in_flight);
        let ours = match in_flight.get(&self.key) {
            Some(entry) => Arc::ptr_eq(&entry.slot, &self.slot),
            None => self.settled,
        };
        if !ours {
            return;
        }
        if self.settled {
            in_flight.insert(
                self.key.clone(),
                SlotEntry {
                    slot: self.slot.clone(),
                    settled_at: Some(now_millis()),
                },
            );
        } else {
            in_flight.remove(&self.key);
        }
    }
}

enum RefreshMode<'a> {
    /// Proactive: skip if the stored token became fresh meanwhile.
    IfStale,
    /// Reactive: refresh unless the rejected token was already replaced.
    Force { rejected: Option<&'a AccessToken> },
}

impl RefreshMode<'_> {
    fn satisfied_by(&self, current: &SessionRecord, now_ms: i64) -> bool {
        match self {
            Self::IfStale => current.is_fresh(now_ms),
            Self::Force { rejected: Some(rejected) } => {
                current.is_fresh(now_ms) && current.access_token() != Some(*rejected)
            }
            Self::Force { rejected: None } => false,
        }
    }

    /// A reactive refresh must not replay an outcome carrying the very token
    /// the provider just rejected.
    fn replays_rejected(&self, outcome: &Result<TokenResponse, TokenEndpointError>) -> bool {
        match (self, outcome) {
            (Self::Force { rejected: Some(rejected) }, Ok(grant)) => {
                grant.access_token == rejected.expose()
            }
            _ => false,
        }
    }
}

enum Prepared {
    AlreadyFresh(SessionRecord),
    Ready {
        base: SessionRecord,
        credentials: AppCredentials,
        refresh_token: RefreshToken,
    },
}

/// Authorization-code login, refresh and token injection for one provider.
///
/// The lifecycle holds no session data itself: every operation takes the
/// [`SessionStore`] for the session it acts on.
///
/// ```rust,ignore
/// let lifecycle = TokenLifecycle::new(AuthClient::new(provider))
///     .with_configured_credentials(Some(AppCredentials::new(id, secret)));
///
/// let request = lifecycle.initiate_login(&store, None).await?;
/// // ... user consents, provider redirects back ...
/// lifecycle.handle_callback(&store, &params).await?;
///
/// let me = lifecycle
///     .with_fresh_token(&store, |token| async move { fetch_profile(token).await })
///     .await;
/// ```
#[derive(Debug)]
pub struct TokenLifecycle {
    client: AuthClient,
    configured: Option<AppCredentials>,
    in_flight: SlotRegistry,
}

impl TokenLifecycle {
    #[must_use]
    pub fn new(client: AuthClient) -> Self {
        Self {
            client,
            configured: None,
            in_flight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide app credentials, used when a login or session carries none.
    #[must_use]
    pub fn with_configured_credentials(mut self, credentials: Option<AppCredentials>) -> Self {
        self.configured = credentials;
        self
    }

    #[must_use]
    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    #[must_use]
    pub fn configured_credentials(&self) -> Option<&AppCredentials> {
        self.configured.as_ref()
    }

    // ── Login ──────────────────────────────────────────────────────

    /// Stage a nonce and build the provider consent URL.
    ///
    /// `supplied` credentials take precedence over configured ones and are
    /// staged with the nonce so the callback can use them.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no credentials are supplied or configured,
    /// [`Error::Store`] when the nonce cannot be staged.
    pub async fn initiate_login<S: SessionStore>(
        &self,
        store: &S,
        supplied: Option<AppCredentials>,
    ) -> Result<AuthorizationRequest, Error> {
        let candidates = CredentialCandidates {
            staged: supplied.as_ref(),
            configured: self.configured.as_ref(),
            ..Default::default()
        };
        let credentials = resolve_credentials(
            &[CredentialSource::Staged, CredentialSource::Configured],
            &candidates,
        )
        .ok_or_else(|| Error::Configuration("no app credentials supplied or configured".into()))?;

        let state = nonce::generate_state();
        let url = self.client.authorization_url(credentials, &state);

        let nonce = NonceRecord {
            state: state.clone(),
            staged: supplied.clone(),
        };
        store.stage_nonce(&nonce).await.map_err(store_error)?;

        tracing::info!(
            client_id = %credentials.client_id,
            user_supplied = supplied.is_some(),
            "Spotify login initiated"
        );

        Ok(AuthorizationRequest { url, state })
    }

    /// Validate the provider redirect and persist the resulting session.
    ///
    /// The staged nonce is cleared whatever the outcome.
    ///
    /// # Errors
    ///
    /// [`Error::Authorization`], [`Error::StateMismatch`], [`Error::MissingCode`],
    /// [`Error::MissingCredentials`], [`Error::TokenExchange`] or [`Error::Store`].
    /// No session is written on error.
    pub async fn handle_callback<S: SessionStore>(
        &self,
        store: &S,
        params: &CallbackParams,
    ) -> Result<SessionRecord, Error> {
        let result = match store.load_nonce().await {
            Ok(staged) => self.complete_callback(store, params, staged).await,
            Err(e) => Err(store_error(e)),
        };

        if let Err(e) = store.clear_nonce().await {
            tracing::warn!(error = %e, "Failed to clear staged nonce");
        }

        result
    }

    async fn complete_callback<S: SessionStore>(
        &self,
        store: &S,
        params: &CallbackParams,
        staged: Option<NonceRecord>,
    ) -> Result<SessionRecord, Error> {
        if let Some(error) = &params.error {
            let desc = params.error_description.as_deref().unwrap_or("none");
            tracing::warn!(error = %error, description = %desc, "OAuth2 error from Spotify");
            return Err(Error::Authorization(error.clone()));
        }

        let nonce = match (staged, params.state.as_deref()) {
            (Some(nonce), Some(received)) if nonce.state == received => nonce,
            _ => {
                tracing::warn!("OAuth state mismatch");
                return Err(Error::StateMismatch);
            }
        };

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(Error::MissingCode)?;

        let candidates = CredentialCandidates {
            staged: nonce.staged.as_ref(),
            configured: self.configured.as_ref(),
            ..Default::default()
        };
        let credentials = resolve_credentials(
            &[CredentialSource::Staged, CredentialSource::Configured],
            &candidates,
        )
        .cloned()
        .ok_or(Error::MissingCredentials)?;

        let issued_at = now_millis();
        let grant = self
            .client
            .exchange_code(&credentials, code)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Token exchange failed");
                Error::TokenExchange {
                    status: e.status(),
                    detail: e.detail(),
                }
            })?;

        let record = SessionRecord::issue(&grant, credentials, issued_at);
        store.save(&record).await.map_err(store_error)?;

        tracing::info!(
            expires_at = record.expires_at(),
            has_refresh_token = record.is_refreshable(),
            "Spotify OAuth2 login successful"
        );

        Ok(record)
    }

    /// Clear the session and any pending authorization.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] if the session could not be cleared.
    pub async fn logout<S: SessionStore>(&self, store: &S) -> Result<(), Error> {
        store.clear().await.map_err(store_error)?;
        if let Err(e) = store.clear_nonce().await {
            tracing::warn!(error = %e, "Failed to clear staged nonce during logout");
        }
        tracing::info!("Spotify session cleared");
        Ok(())
    }

    // ── Refresh ────────────────────────────────────────────────────

    /// Make sure the stored access token is usable, refreshing it if needed.
    ///
    /// A fresh token costs no network call; an unauthenticated session is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`Error::RefreshTokenInvalid`] after the provider rejected the refresh
    /// token (the session has been cleared), [`Error::RefreshFailed`] for
    /// transient failures (the session is untouched),
    /// [`Error::MissingCredentials`] or [`Error::Store`].
    pub async fn ensure_fresh<S: SessionStore>(&self, store: &S) -> Result<Freshness, Error> {
        let record = store.load().await.map_err(store_error)?;

        if record.is_unauthenticated() {
            return Ok(Freshness::Unauthenticated);
        }
        if record.is_fresh(now_millis()) {
            return Ok(Freshness::Current(record));
        }
        if !record.is_refreshable() {
            return Ok(Freshness::Stale(record));
        }

        tracing::debug!("Access token expired or missing, refreshing");
        self.refresh_record(store, record, RefreshMode::IfStale)
            .await
            .map(Freshness::Refreshed)
    }

    /// Refresh regardless of the stored expiry.
    ///
    /// Pass the token the provider just answered `401` for as `rejected`;
    /// if a concurrent request already replaced it, the replacement is
    /// returned without another refresh.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] when there is no refresh token, otherwise as
    /// [`ensure_fresh`](Self::ensure_fresh).
    pub async fn force_refresh<S: SessionStore>(
        &self,
        store: &S,
        rejected: Option<&AccessToken>,
    ) -> Result<SessionRecord, Error> {
        let record = store.load().await.map_err(store_error)?;
        if !record.is_refreshable() {
            return Err(Error::Unauthenticated);
        }
        self.refresh_record(store, record, RefreshMode::Force { rejected })
            .await
    }

    /// Single-flight refresh keyed by the refresh token's fingerprint.
    ///
    /// The first caller performs the exchange and persists the result while
    /// holding the slot. Callers queued on the same slot, and callers arriving
    /// with the consumed token within [`REFRESH_REUSE_WINDOW_MS`] of a settled
    /// outcome, reuse it instead of replaying a refresh token that may have
    /// been rotated.
    async fn refresh_record<S: SessionStore>(
        &self,
        store: &S,
        record: SessionRecord,
        mode: RefreshMode<'_>,
    ) -> Result<SessionRecord, Error> {
        let Some(refresh_token) = record.refresh_token() else {
            return Err(Error::Unauthenticated);
        };
        let key = nonce::token_fingerprint(refresh_token.expose());
        let slot = self.acquire_slot(&key);
        let mut shared = slot.lock().await;

        if let Some((issued_at, outcome)) = shared.clone() {
            if !mode.replays_rejected(&outcome) {
                tracing::debug!("Reusing shared token refresh");
                return self.apply_refresh(store, record, issued_at, outcome).await;
            }
        }

        let mut release = SlotRelease {
            in_flight: &self.in_flight,
            key,
            slot: slot.clone(),
            settled: false,
        };
        match self.prepare_refresh(store, &mode).await {
            Ok(Prepared::AlreadyFresh(current)) => {
                tracing::debug!("Session already refreshed by a concurrent request");
                Ok(current)
            }
            Ok(Prepared::Ready {
                base,
                credentials,
                refresh_token,
            }) => {
                let issued_at = now_millis();
                let outcome = self
                    .client
                    .refresh(&credentials, refresh_token.expose())
                    .await;
                // Transient failures are only shared with queued callers.
                release.settled = outcome
                    .as_ref()
                    .map_or_else(TokenEndpointError::is_invalid_grant, |_| true);
                *shared = Some((issued_at, outcome.clone()));
                self.apply_refresh(store, base, issued_at, outcome).await
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare_refresh<S: SessionStore>(
        &self,
        store: &S,
        mode: &RefreshMode<'_>,
    ) -> Result<Prepared, Error> {
        let current = store.load().await.map_err(store_error)?;
        if mode.satisfied_by(&current, now_millis()) {
            return Ok(Prepared::AlreadyFresh(current));
        }

        let Some(refresh_token) = current.refresh_token().cloned() else {
            return Err(Error::Unauthenticated);
        };

        let candidates = CredentialCandidates {
            stored: current.credentials(),
            configured: self.configured.as_ref(),
            ..Default::default()
        };
        let credentials = resolve_credentials(
            &[CredentialSource::Stored, CredentialSource::Configured],
            &candidates,
        )
        .cloned()
        .ok_or(Error::MissingCredentials)?;

        Ok(Prepared::Ready {
            base: current,
            credentials,
            refresh_token,
        })
    }

    async fn apply_refresh<S: SessionStore>(
        &self,
        store: &S,
        base: SessionRecord,
        issued_at: i64,
        outcome: Result<TokenResponse, TokenEndpointError>,
    ) -> Result<SessionRecord, Error> {
        match outcome {
            Ok(grant) => {
                let updated = base.refreshed(&grant, issued_at);
                store.save(&updated).await.map_err(store_error)?;
                tracing::info!(
                    expires_at = updated.expires_at(),
                    rotated = grant.refresh_token.is_some(),
                    "Access token refreshed"
                );
                Ok(updated)
            }
            Err(e) if e.is_invalid_grant() => {
                tracing::warn!(status = ?e.status(), "Refresh token rejected, clearing session");
                store.clear().await.map_err(store_error)?;
                Err(Error::RefreshTokenInvalid)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, keeping session");
                Err(Error::RefreshFailed(e.to_string()))
            }
        }
    }

    fn acquire_slot(&self, key: &str) -> RefreshSlot {
        let mut in_flight = registry(&self.in_flight);
        let now = now_millis();
        in_flight.retain(|_, entry| entry.is_live(now));
        in_flight
            .entry(key.to_string())
            .or_insert_with(|| SlotEntry {
                slot: RefreshSlot::default(),
                settled_at: None,
            })
            .slot
            .clone()
    }

    // ── Injection ──────────────────────────────────────────────────

    /// The token an outbound provider call should carry, if any.
    ///
    /// Refreshes first when needed. A transient refresh failure falls back to
    /// the existing token; a rejected refresh token yields `None` (the
    /// session is already cleared).
    pub async fn access_token<S: SessionStore>(&self, store: &S) -> Option<AccessToken> {
        match self.ensure_fresh(store).await {
            Ok(freshness) => freshness.access_token().cloned(),
            Err(Error::RefreshTokenInvalid) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Using existing access token after failed refresh");
                store
                    .load()
                    .await
                    .ok()
                    .and_then(|record| record.access_token().cloned())
            }
        }
    }

    /// Run `call` with a token resolved strictly before it starts.
    ///
    /// The call never sees refresh errors: it receives `None` when there is no
    /// usable token and is expected to report the unauthenticated state itself.
    pub async fn with_fresh_token<S, F, Fut, T>(&self, store: &S, call: F) -> T
    where
        S: SessionStore,
        F: FnOnce(Option<AccessToken>) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.access_token(store).await;
        call(token).await
    }

    /// Whether the stored token needs a refresh or the user must log in.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] if the session cannot be read.
    pub async fn status<S: SessionStore>(&self, store: &S) -> Result<SessionStatus, Error> {
        let record = store.load().await.map_err(store_error)?;
        let now = now_millis();
        let expires_at = record.expires_at().unwrap_or(0);
        let needs_login = record.access_token().is_none() || record.refresh_token().is_none();

        Ok(SessionStatus {
            needs_refresh: !needs_login && expires_at <= now,
            needs_login,
            expires_at,
            current_time: now,
        })
    }

    // ── Credentials ────────────────────────────────────────────────

    /// Check app credentials with a `client_credentials` grant.
    ///
    /// Returns `Ok(false)` when the provider rejects them.
    ///
    /// # Errors
    ///
    /// [`Error::TokenExchange`] for transport failures or unexpected statuses.
    pub async fn validate_credentials(&self, credentials: &AppCredentials) -> Result<bool, Error> {
        match self.client.client_credentials(credentials).await {
            Ok(grant) => Ok(!grant.access_token.is_empty()),
            Err(e) if e.is_invalid_grant() => {
                tracing::info!(client_id = %credentials.client_id, "Spotify rejected app credentials");
                Ok(false)
            }
            Err(e) => Err(Error::TokenExchange {
                status: e.status(),
                detail: e.detail(),
            }),
        }
    }
}

fn store_error(e: StoreError) -> Error {
    Error::Store(e.to_string())
}
