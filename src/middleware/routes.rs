use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use serde_json::json;

use super::error::AuthError;
use super::state::AuthState;
use crate::credentials::AppCredentials;
use crate::error::Error;
use crate::lifecycle::{CallbackParams, SessionStatus};

/// Create the Spotify authentication router, mounted under the auth path.
///
/// | Route | Purpose |
/// |---|---|
/// | `GET /login` | Redirect to Spotify with the configured credentials |
/// | `POST /initiate` | Start a login with user-supplied credentials |
/// | `GET /callback` | Complete the authorization-code flow |
/// | `POST /refresh` | Refresh the access token now |
/// | `GET /refresh` | Report whether a refresh or login is needed |
/// | `POST /validate` | Check app credentials |
/// | `GET`/`POST /logout` | Clear the session |
pub fn auth_routes(state: &AuthState) -> Router {
    let auth_path = state.settings.auth_path.clone();

    Router::new()
        .route(&format!("{auth_path}/login"), get(login))
        .route(&format!("{auth_path}/initiate"), post(initiate))
        .route(&format!("{auth_path}/callback"), get(callback))
        .route(
            &format!("{auth_path}/refresh"),
            get(refresh_status).post(refresh),
        )
        .route(&format!("{auth_path}/validate"), post(validate))
        .route(&format!("{auth_path}/logout"), get(logout).post(logout))
        .with_state(state.clone())
}

// ── Login ──────────────────────────────────────────────────────────

async fn login(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), Response> {
    let store = state.cookie_store(jar);

    let request = state
        .lifecycle()
        .initiate_login(&store, None)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Login initiation failed");
            login_error(&state.settings.error_redirect, "missing_credentials")
        })?;

    Ok((store.into_jar(), Redirect::to(request.url.as_str())))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsBody {
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl CredentialsBody {
    fn into_credentials(self) -> Result<AppCredentials, AuthError> {
        match (self.client_id, self.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                let credentials = AppCredentials::new(id, secret);
                if credentials.is_well_formed() {
                    Ok(credentials)
                } else {
                    Err(AuthError::InvalidRequest("Malformed credentials".into()))
                }
            }
            _ => Err(AuthError::InvalidRequest("Missing credentials".into())),
        }
    }
}

fn credentials_from(
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<AppCredentials, AuthError> {
    let Json(body) = body.map_err(|e| AuthError::InvalidRequest(e.body_text()))?;
    body.into_credentials()
}

async fn initiate(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<(PrivateCookieJar, Json<serde_json::Value>), AuthError> {
    let credentials = credentials_from(body)?;
    let store = state.cookie_store(jar);

    let request = state
        .lifecycle()
        .initiate_login(&store, Some(credentials))
        .await?;

    Ok((
        store.into_jar(),
        Json(json!({ "authUrl": request.url.as_str() })),
    ))
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> (PrivateCookieJar, Response) {
    let store = state.cookie_store(jar);

    let response = match state.lifecycle().handle_callback(&store, &params).await {
        Ok(_) => Redirect::to(&state.settings.login_redirect).into_response(),
        Err(e) => login_error(&state.settings.error_redirect, &callback_error_code(&e)),
    };

    (store.into_jar(), response)
}

fn callback_error_code(error: &Error) -> String {
    match error {
        Error::Authorization(code) => code.clone(),
        Error::StateMismatch => "state_mismatch".into(),
        Error::MissingCode => "no_code".into(),
        Error::MissingCredentials => "missing_credentials".into(),
        Error::TokenExchange { .. } => "token_exchange_failed".into(),
        _ => "callback_failed".into(),
    }
}

// ── Refresh ────────────────────────────────────────────────────────

async fn refresh(State(state): State<AuthState>, jar: PrivateCookieJar) -> Response {
    let store = state.cookie_store(jar);

    let result = state.lifecycle().force_refresh(&store, None).await;
    let body = match result {
        Ok(record) => Json(json!({
            "success": true,
            "expires_at": record.expires_at(),
        }))
        .into_response(),
        Err(e) => AuthError::from(e).into_response(),
    };

    (store.into_jar(), body).into_response()
}

async fn refresh_status(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<SessionStatus>), AuthError> {
    let store = state.cookie_store(jar);
    let status = state.lifecycle().status(&store).await?;
    Ok((store.into_jar(), Json(status)))
}

// ── Validate ───────────────────────────────────────────────────────

async fn validate(
    State(state): State<AuthState>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<Response, AuthError> {
    let credentials = credentials_from(body)?;

    if state.lifecycle().validate_credentials(&credentials).await? {
        Ok(Json(json!({ "valid": true })).into_response())
    } else {
        Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Invalid credentials. Please check your Client ID and Secret."
            })),
        )
            .into_response())
    }
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(State(state): State<AuthState>, jar: PrivateCookieJar) -> (PrivateCookieJar, Redirect) {
    let store = state.cookie_store(jar);

    if let Err(e) = state.lifecycle().logout(&store).await {
        tracing::warn!(error = %e, "Session clear failed during logout");
    }

    (
        store.into_jar(),
        Redirect::to(&state.settings.logout_redirect),
    )
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(error_redirect: &str, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    let separator = if error_redirect.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{error_redirect}{separator}error={encoded}")).into_response()
}
