use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;
use tokio::sync::Mutex;

use crate::credentials::AppCredentials;
use crate::session::{NonceRecord, SessionRecord, SessionStore, StoreError};
use crate::types::{AccessToken, EXPIRY_SAFETY_MARGIN_SECS, RefreshToken, now_millis};

pub(super) const STATE_COOKIE_NAME: &str = "auth_state";
pub(super) const CLIENT_ID_TEMP_COOKIE_NAME: &str = "client_id_temp";
pub(super) const CLIENT_SECRET_TEMP_COOKIE_NAME: &str = "client_secret_temp";
pub(super) const ACCESS_TOKEN_COOKIE_NAME: &str = "access_token";
pub(super) const REFRESH_TOKEN_COOKIE_NAME: &str = "refresh_token";
pub(super) const EXPIRES_AT_COOKIE_NAME: &str = "token_expires_at";
pub(super) const CREDENTIALS_COOKIE_NAME: &str = "client_credentials";

const NONCE_TTL: Duration = Duration::minutes(10);
const LONG_LIVED_TTL: Duration = Duration::days(30);
const SESSION_PATH: &str = "/";

/// Cookie attributes that depend on deployment.
#[derive(Debug, Clone)]
pub(super) struct CookieSettings {
    pub(super) secure: bool,
    pub(super) auth_path: String,
}

/// Create an HTTP-only, same-site-lax cookie.
fn cookie(
    name: &'static str,
    value: String,
    path: &str,
    max_age: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(path.to_string())
        .max_age(max_age)
        .build()
}

/// Create a cookie matching `name` and `path` for removal.
fn removal(name: &'static str, path: &str) -> Cookie<'static> {
    Cookie::build((name, "")).path(path.to_string()).build()
}

fn value(jar: &PrivateCookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Lifetime of the access-token cookies: the remaining validity plus the
/// safety margin, i.e. the provider's `expires_in` at issue time.
fn access_ttl(expires_at: i64, now: i64) -> Duration {
    let remaining_secs = (expires_at - now).max(0) / 1000;
    Duration::seconds(remaining_secs + EXPIRY_SAFETY_MARGIN_SECS as i64)
}

/// [`SessionStore`] over one request's encrypted cookie jar.
///
/// Writes accumulate in the jar; return [`into_jar`](Self::into_jar) from the
/// handler so the browser receives them.
///
/// ```rust,ignore
/// async fn handler(State(auth): State<AuthState>, jar: PrivateCookieJar) -> impl IntoResponse {
///     let store = auth.cookie_store(jar);
///     let devices = auth.api_client().get_json::<Devices, _>(&store, "me/player/devices").await;
///     (store.into_jar(), Json(devices.ok().flatten()))
/// }
/// ```
pub struct CookieSessionStore {
    jar: Mutex<PrivateCookieJar>,
    settings: CookieSettings,
}

impl CookieSessionStore {
    pub(super) fn new(jar: PrivateCookieJar, settings: CookieSettings) -> Self {
        Self {
            jar: Mutex::new(jar),
            settings,
        }
    }

    /// The jar with every write made through this store.
    #[must_use]
    pub fn into_jar(self) -> PrivateCookieJar {
        self.jar.into_inner()
    }

    fn session_cookie(&self, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        cookie(name, value, SESSION_PATH, max_age, self.settings.secure)
    }

    fn nonce_cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        cookie(
            name,
            value,
            &self.settings.auth_path,
            NONCE_TTL,
            self.settings.secure,
        )
    }
}

impl SessionStore for CookieSessionStore {
    async fn load(&self) -> Result<SessionRecord, StoreError> {
        let jar = self.jar.lock().await;

        let expires_at = value(&jar, EXPIRES_AT_COOKIE_NAME).and_then(|v| v.parse::<i64>().ok());
        let credentials = value(&jar, CREDENTIALS_COOKIE_NAME).and_then(|encoded| {
            let decoded = AppCredentials::from_basic(&encoded);
            if decoded.is_none() {
                tracing::warn!("Ignoring undecodable client credentials cookie");
            }
            decoded
        });

        Ok(SessionRecord::restore(
            value(&jar, ACCESS_TOKEN_COOKIE_NAME).map(AccessToken::new),
            value(&jar, REFRESH_TOKEN_COOKIE_NAME).map(RefreshToken::new),
            expires_at,
            credentials,
        ))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut jar = self.jar.lock().await;
        let mut next = jar.clone();

        match (record.access_token(), record.expires_at()) {
            (Some(token), Some(expires_at)) => {
                let ttl = access_ttl(expires_at, now_millis());
                next = next
                    .add(self.session_cookie(
                        ACCESS_TOKEN_COOKIE_NAME,
                        token.expose().to_string(),
                        ttl,
                    ))
                    .add(self.session_cookie(EXPIRES_AT_COOKIE_NAME, expires_at.to_string(), ttl));
            }
            _ => {
                next = next
                    .remove(removal(ACCESS_TOKEN_COOKIE_NAME, SESSION_PATH))
                    .remove(removal(EXPIRES_AT_COOKIE_NAME, SESSION_PATH));
            }
        }

        // Long-lived cookies are only rewritten on change so their 30-day
        // lifetime keeps counting from issue.
        match record.refresh_token() {
            Some(token)
                if value(&next, REFRESH_TOKEN_COOKIE_NAME).as_deref() != Some(token.expose()) =>
            {
                next = next.add(self.session_cookie(
                    REFRESH_TOKEN_COOKIE_NAME,
                    token.expose().to_string(),
                    LONG_LIVED_TTL,
                ));
            }
            Some(_) => {}
            None => next = next.remove(removal(REFRESH_TOKEN_COOKIE_NAME, SESSION_PATH)),
        }

        match record.credentials().map(AppCredentials::to_basic) {
            Some(encoded)
                if value(&next, CREDENTIALS_COOKIE_NAME).as_deref() != Some(encoded.as_str()) =>
            {
                next = next.add(self.session_cookie(
                    CREDENTIALS_COOKIE_NAME,
                    encoded,
                    LONG_LIVED_TTL,
                ));
            }
            Some(_) => {}
            None => next = next.remove(removal(CREDENTIALS_COOKIE_NAME, SESSION_PATH)),
        }

        *jar = next;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut jar = self.jar.lock().await;
        *jar = jar
            .clone()
            .remove(removal(ACCESS_TOKEN_COOKIE_NAME, SESSION_PATH))
            .remove(removal(REFRESH_TOKEN_COOKIE_NAME, SESSION_PATH))
            .remove(removal(EXPIRES_AT_COOKIE_NAME, SESSION_PATH))
            .remove(removal(CREDENTIALS_COOKIE_NAME, SESSION_PATH));
        Ok(())
    }

    async fn load_nonce(&self) -> Result<Option<NonceRecord>, StoreError> {
        let jar = self.jar.lock().await;

        let Some(state) = value(&jar, STATE_COOKIE_NAME) else {
            return Ok(None);
        };
        let staged = match (
            value(&jar, CLIENT_ID_TEMP_COOKIE_NAME),
            value(&jar, CLIENT_SECRET_TEMP_COOKIE_NAME),
        ) {
            (Some(id), Some(secret)) => Some(AppCredentials::new(id, secret)),
            _ => None,
        };

        Ok(Some(NonceRecord { state, staged }))
    }

    async fn stage_nonce(&self, nonce: &NonceRecord) -> Result<(), StoreError> {
        let mut jar = self.jar.lock().await;
        let auth_path = self.settings.auth_path.as_str();

        let mut next = jar
            .clone()
            .add(self.nonce_cookie(STATE_COOKIE_NAME, nonce.state.clone()));
        next = match &nonce.staged {
            Some(credentials) => next
                .add(self.nonce_cookie(CLIENT_ID_TEMP_COOKIE_NAME, credentials.client_id.clone()))
                .add(self.nonce_cookie(
                    CLIENT_SECRET_TEMP_COOKIE_NAME,
                    credentials.client_secret.clone(),
                )),
            None => next
                .remove(removal(CLIENT_ID_TEMP_COOKIE_NAME, auth_path))
                .remove(removal(CLIENT_SECRET_TEMP_COOKIE_NAME, auth_path)),
        };

        *jar = next;
        Ok(())
    }

    async fn clear_nonce(&self) -> Result<(), StoreError> {
        let mut jar = self.jar.lock().await;
        let auth_path = self.settings.auth_path.as_str();

        *jar = jar
            .clone()
            .remove(removal(STATE_COOKIE_NAME, auth_path))
            .remove(removal(CLIENT_ID_TEMP_COOKIE_NAME, auth_path))
            .remove(removal(CLIENT_SECRET_TEMP_COOKIE_NAME, auth_path));
        Ok(())
    }
}
