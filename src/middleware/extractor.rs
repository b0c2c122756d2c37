use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use super::error::AuthError;
use crate::types::AccessToken;

/// Spotify access token resolved by [`with_fresh_tokens`](super::with_fresh_tokens).
///
/// Use as an Axum extractor in routes wrapped by the token layer. Returns
/// `401 Unauthorized` if the session has no usable token.
///
/// # Example
///
/// ```rust,ignore
/// async fn now_playing(ProviderToken(token): ProviderToken) -> impl IntoResponse {
///     reqwest::Client::new()
///         .get("https://api.spotify.com/v1/me/player/currently-playing")
///         .bearer_auth(token.expose())
///         .send()
///         .await
///         .map(|r| r.status().as_u16())
///         .unwrap_or(502)
///         .to_string()
/// }
///
/// // Optional: accessible with or without a session
/// async fn home(token: Option<ProviderToken>) -> impl IntoResponse {
///     if token.is_some() { "Connected" } else { "Connect Spotify" }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ProviderToken(pub AccessToken);

impl<S: Send + Sync> FromRequestParts<S> for ProviderToken {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ProviderToken>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for ProviderToken {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<ProviderToken>().cloned())
    }
}
