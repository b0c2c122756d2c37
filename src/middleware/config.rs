use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::credentials::AppCredentials;
use crate::oauth::ProviderConfig;

/// Shared auth settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) error_redirect: String,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            secure_cookies: true,
            auth_path: "/api/auth/spotify".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: "/".into(),
        }
    }
}

/// Spotify authentication configuration.
///
/// The provider configuration is a constructor parameter; app credentials
/// are optional because users may supply their own at login time.
///
/// Use [`from_env()`](AuthConfig::from_env) for convention-based setup,
/// or [`new()`](AuthConfig::new) with `with_*` methods for full control.
pub struct AuthConfig {
    pub(super) provider: ProviderConfig,
    pub(super) credentials: Option<AppCredentials>,
    pub(super) http: Option<reqwest::Client>,
    pub(super) settings: AuthSettings,
}

impl AuthConfig {
    /// Create config with the required provider settings.
    ///
    /// All optional fields use sensible defaults. Override with `with_*` methods.
    #[must_use]
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            credentials: None,
            http: None,
            settings: AuthSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SPOTIFY_REDIRECT_URI`: OAuth2 callback URI (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET`: server-wide app
    ///   credentials (both or neither)
    /// - `SPOTIFY_AUTH_URL`: Override the authorize endpoint
    /// - `SPOTIFY_TOKEN_URL`: Override the token endpoint
    /// - `SPOTIFY_API_URL`: Override the Web API base URL
    /// - `SPOTIFY_SCOPES`: Comma-separated OAuth2 scopes
    /// - `DEV_MODE`: Set to `"1"` or `"true"` to disable secure cookies
    /// - `COOKIE_KEY`: Cookie encryption key bytes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required variables are missing or values are invalid.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let redirect_uri = parse_url(
            "SPOTIFY_REDIRECT_URI",
            &var("SPOTIFY_REDIRECT_URI")
                .ok_or_else(|| AuthError::Config("SPOTIFY_REDIRECT_URI is required".into()))?,
        )?;

        let mut provider = ProviderConfig::new(redirect_uri);

        if let Some(url) = var("SPOTIFY_AUTH_URL") {
            provider = provider.with_auth_url(parse_url("SPOTIFY_AUTH_URL", &url)?);
        }
        if let Some(url) = var("SPOTIFY_TOKEN_URL") {
            provider = provider.with_token_url(parse_url("SPOTIFY_TOKEN_URL", &url)?);
        }
        if let Some(url) = var("SPOTIFY_API_URL") {
            provider = provider.with_api_url(parse_url("SPOTIFY_API_URL", &url)?);
        }
        if let Some(scopes) = var("SPOTIFY_SCOPES") {
            provider = provider.with_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }

        let credentials = match (var("SPOTIFY_CLIENT_ID"), var("SPOTIFY_CLIENT_SECRET")) {
            (Some(id), Some(secret)) => Some(AppCredentials::new(id, secret)),
            (None, None) => None,
            _ => {
                return Err(AuthError::Config(
                    "SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together".into(),
                ));
            }
        };

        let dev_mode = matches!(var("DEV_MODE").as_deref(), Some("1") | Some("true"));

        let cookie_key = match var("COOKIE_KEY") {
            Some(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            None => Key::generate(),
        };

        Ok(Self::new(provider)
            .with_credentials(credentials)
            .with_cookie_key(cookie_key)
            .with_secure_cookies(!dev_mode))
    }

    /// Server-wide app credentials used when the user supplies none.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<AppCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use a custom HTTP client for token and API calls.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, AuthError> {
    value
        .parse()
        .map_err(|e| AuthError::Config(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn requires_redirect_uri() {
        let err = AuthConfig::from_vars(lookup(&[])).err().unwrap();
        assert!(matches!(err, AuthError::Config(ref m) if m.contains("SPOTIFY_REDIRECT_URI")));
    }

    #[test]
    fn rejects_invalid_redirect_uri() {
        let err = AuthConfig::from_vars(lookup(&[("SPOTIFY_REDIRECT_URI", "not a url")]))
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn reads_overrides_and_credentials() {
        let config = AuthConfig::from_vars(lookup(&[
            ("SPOTIFY_REDIRECT_URI", "http://localhost:3000/api/auth/spotify/callback"),
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
            ("SPOTIFY_TOKEN_URL", "http://127.0.0.1:9000/api/token"),
            ("SPOTIFY_SCOPES", "streaming, user-read-email"),
            ("DEV_MODE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.credentials, Some(AppCredentials::new("id", "secret")));
        assert_eq!(
            config.provider.token_url().as_str(),
            "http://127.0.0.1:9000/api/token"
        );
        assert_eq!(config.provider.scopes(), &["streaming", "user-read-email"]);
        assert!(!config.settings.secure_cookies);
    }

    #[test]
    fn rejects_half_configured_credentials() {
        let err = AuthConfig::from_vars(lookup(&[
            ("SPOTIFY_REDIRECT_URI", "http://localhost/callback"),
            ("SPOTIFY_CLIENT_ID", "id"),
        ]))
        .err()
        .unwrap();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn rejects_short_cookie_key() {
        let err = AuthConfig::from_vars(lookup(&[
            ("SPOTIFY_REDIRECT_URI", "http://localhost/callback"),
            ("COOKIE_KEY", "too-short"),
        ]))
        .err()
        .unwrap();
        assert!(matches!(err, AuthError::Config(ref m) if m.contains("COOKIE_KEY")));
    }

    #[test]
    fn defaults_are_secure() {
        let config = AuthConfig::new(ProviderConfig::new(
            "https://vinyl.test/api/auth/spotify/callback".parse().unwrap(),
        ));
        assert!(config.settings.secure_cookies);
        assert_eq!(config.settings.auth_path, "/api/auth/spotify");
        assert!(config.credentials.is_none());
    }
}
