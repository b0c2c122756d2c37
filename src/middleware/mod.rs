//! Cookie-backed Spotify authentication for Axum.
//!
//! This module wires [`TokenLifecycle`](crate::TokenLifecycle) into an Axum
//! application: encrypted session cookies, the login/callback/refresh routes,
//! and a layer that refreshes tokens before protected handlers run.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vinyl_auth::middleware::{AuthConfig, AuthState, ProviderToken, auth_routes, with_fresh_tokens};
//!
//! // 1. Configure from environment
//! let state = AuthState::new(AuthConfig::from_env()?);
//!
//! // 2. Mount auth routes and wrap your Spotify-facing routes
//! let api = axum::Router::new().route("/api/spotify/me", get(me));
//! let app = auth_routes(&state).merge(with_fresh_tokens(api, &state));
//!
//! // 3. Take the fresh token in handlers
//! async fn me(ProviderToken(token): ProviderToken) -> impl IntoResponse { /* ... */ }
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod interceptor;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

pub use config::AuthConfig;
pub use cookies::CookieSessionStore;
pub use error::AuthError;
pub use extractor::ProviderToken;
pub use interceptor::with_fresh_tokens;
pub use routes::auth_routes;
pub use state::AuthState;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
