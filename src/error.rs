/// Errors raised by the token lifecycle.
///
/// Token-endpoint failures are converted into these variants at the component
/// boundary. Only [`Error::RefreshTokenInvalid`] is accompanied by a destructive
/// change to the stored session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// App credentials are missing or the configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider redirected back with an `error` parameter.
    #[error("Authorization denied by provider: {0}")]
    Authorization(String),

    /// Callback `state` did not match the staged nonce.
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// Callback carried no authorization code.
    #[error("Missing authorization code")]
    MissingCode,

    /// Neither staged nor configured app credentials are available.
    #[error("Missing app credentials")]
    MissingCredentials,

    /// The provider rejected the authorization code exchange.
    #[error("Token exchange failed (status {status:?}): {detail}")]
    TokenExchange { status: Option<u16>, detail: String },

    /// Transient refresh failure; the existing session was kept.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The provider rejected the refresh token; the session was cleared.
    #[error("Refresh token rejected by provider")]
    RefreshTokenInvalid,

    /// No usable access token exists for the session.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Provider API call returned a non-success status.
    #[error("Provider API error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    /// Session store operation failed.
    #[error("Session store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
