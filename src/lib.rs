#![doc = include_str!("../README.md")]

pub mod api;
pub mod credentials;
pub mod error;
pub mod lifecycle;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod nonce;
pub mod oauth;
pub mod session;
pub mod types;

// Re-exports for convenient access
pub use api::ApiClient;
pub use credentials::{AppCredentials, CredentialCandidates, CredentialSource, resolve_credentials};
pub use error::Error;
pub use lifecycle::{AuthorizationRequest, CallbackParams, Freshness, SessionStatus, TokenLifecycle};
pub use nonce::generate_state;
pub use oauth::{AuthClient, ProviderConfig, TokenResponse};
pub use session::{MemorySessionStore, NonceRecord, SessionRecord, SessionStore, StoreError};
pub use types::{AccessToken, RefreshToken};
