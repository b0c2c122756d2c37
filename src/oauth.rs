use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::credentials::AppCredentials;

/// Timeout applied to every call against the provider.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes needed for playback control and reading user data.
pub const DEFAULT_SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-read-recently-played",
    "user-read-playback-position",
    "user-read-email",
    "user-read-private",
    "streaming",
    "app-remote-control",
];

/// Spotify `OAuth2` endpoint configuration.
///
/// The redirect URI is the only required field and is a constructor
/// parameter. Endpoints default to the public Spotify accounts service.
///
/// ```rust,ignore
/// use vinyl_auth::ProviderConfig;
///
/// let config = ProviderConfig::new("https://my-app.com/api/auth/spotify/callback".parse()?)
///     .with_token_url("http://127.0.0.1:9000/api/token".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) api_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(redirect_uri: Url) -> Self {
        Self {
            redirect_uri,
            auth_url: "https://accounts.spotify.com/authorize"
                .parse()
                .expect("valid default URL"),
            token_url: "https://accounts.spotify.com/api/token"
                .parse()
                .expect("valid default URL"),
            api_url: "https://api.spotify.com/v1/"
                .parse()
                .expect("valid default URL"),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Override the authorization (consent) endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the Web API base URL. Relative API paths are joined onto it.
    #[must_use]
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = url;
        self
    }

    /// Override the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Token response from the provider token endpoint.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

/// Failure talking to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenEndpointError {
    /// The endpoint answered with a non-success status.
    Rejected { status: u16, detail: String },
    /// Network failure, timeout, or an undecodable body.
    Transport(String),
}

impl TokenEndpointError {
    /// `400`/`401` mean the grant or the client credentials are invalid.
    pub(crate) fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::Rejected { status: 400 | 401, .. })
    }

    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    pub(crate) fn detail(&self) -> String {
        match self {
            Self::Rejected { detail, .. } | Self::Transport(detail) => detail.clone(),
        }
    }
}

impl std::fmt::Display for TokenEndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected { status, detail } => write!(f, "status {status}: {detail}"),
            Self::Transport(detail) => write!(f, "transport: {detail}"),
        }
    }
}

impl From<reqwest::Error> for TokenEndpointError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Spotify accounts-service client.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl AuthClient {
    /// Create a client with a [`DEFAULT_HTTP_TIMEOUT`] request timeout.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client build failed, falling back to defaults without a timeout");
                reqwest::Client::new()
            });
        Self { config, http }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Build the consent URL for `credentials` and `state`.
    ///
    /// `show_dialog=true` forces the provider to re-prompt for consent.
    #[must_use]
    pub fn authorization_url(&self, credentials: &AppCredentials, state: &str) -> Url {
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &credentials.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", state)
            .append_pair("show_dialog", "true");
        url
    }

    /// Exchange an authorization code for an access/refresh token pair.
    pub(crate) async fn exchange_code(
        &self,
        credentials: &AppCredentials,
        code: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        self.token_request(credentials, &params, "token exchange")
            .await
    }

    /// Exchange a refresh token for a new access token.
    pub(crate) async fn refresh(
        &self,
        credentials: &AppCredentials,
        refresh_token: &str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(credentials, &params, "token refresh")
            .await
    }

    /// Request an app-only token; succeeds only for valid credentials.
    pub(crate) async fn client_credentials(
        &self,
        credentials: &AppCredentials,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let params = [("grant_type", "client_credentials")];
        self.token_request(credentials, &params, "credential validation")
            .await
    }

    async fn token_request(
        &self,
        credentials: &AppCredentials,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(params)
            .send()
            .await?;

        let response = Self::ensure_success(response, operation).await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, TokenEndpointError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(operation, status, "Token endpoint returned an error");
        Err(TokenEndpointError::Rejected {
            status,
            detail: body,
        })
    }
}
