use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;

use super::config::{AuthConfig, AuthSettings};
use super::cookies::{CookieSessionStore, CookieSettings};
use crate::api::ApiClient;
use crate::lifecycle::TokenLifecycle;
use crate::oauth::AuthClient;

/// Shared state for the auth routes and the token layer.
///
/// Cheap to clone. Build it once and hand it to both
/// [`auth_routes`](super::auth_routes) and
/// [`with_fresh_tokens`](super::with_fresh_tokens) so they share one
/// single-flight refresh registry.
#[derive(Clone)]
pub struct AuthState {
    lifecycle: Arc<TokenLifecycle>,
    api: ApiClient,
    pub(super) settings: AuthSettings,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let mut client = AuthClient::new(config.provider);
        if let Some(http) = config.http {
            client = client.with_http_client(http);
        }
        let lifecycle = Arc::new(
            TokenLifecycle::new(client).with_configured_credentials(config.credentials),
        );
        let api = ApiClient::new(lifecycle.clone());

        Self {
            lifecycle,
            api,
            settings: config.settings,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    /// Provider API client sharing this state's lifecycle.
    #[must_use]
    pub fn api_client(&self) -> &ApiClient {
        &self.api
    }

    /// Wrap a request's cookie jar as a [`SessionStore`](crate::SessionStore).
    #[must_use]
    pub fn cookie_store(&self, jar: PrivateCookieJar) -> CookieSessionStore {
        CookieSessionStore::new(
            jar,
            CookieSettings {
                secure: self.settings.secure_cookies,
                auth_path: self.settings.auth_path.clone(),
            },
        )
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<AuthState> for Key {
    fn from_ref(state: &AuthState) -> Self {
        state.settings.cookie_key.clone()
    }
}
