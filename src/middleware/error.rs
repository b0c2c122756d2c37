use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

/// Authentication errors for the middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable session.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The provider revoked the session's refresh token.
    #[error("Session expired")]
    SessionExpired,

    /// Malformed or missing request input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider failed transiently.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Session store operation failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                "Internal error".to_string()
            }
            Self::Upstream(_) => {
                tracing::warn!(error = %self, "Spotify request failed");
                self.to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::Unauthenticated | Error::MissingCredentials => Self::Unauthenticated,
            Error::RefreshTokenInvalid => Self::SessionExpired,
            Error::Authorization(_) | Error::StateMismatch | Error::MissingCode => {
                Self::InvalidRequest(e.to_string())
            }
            Error::TokenExchange { .. }
            | Error::RefreshFailed(_)
            | Error::Api { .. }
            | Error::Http(_) => Self::Upstream(e.to_string()),
            Error::Store(msg) => Self::Store(msg),
            Error::Configuration(msg) => Self::Config(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AuthError::from(Error::RefreshTokenInvalid).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::from(Error::RefreshFailed("timeout".into()))
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AuthError::from(Error::StateMismatch).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::from(Error::Store("disk".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
