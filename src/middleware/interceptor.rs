use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Cookie;
use time::Duration;

use super::extractor::ProviderToken;
use super::state::AuthState;

/// Wrap `router` so every request carries a fresh Spotify token.
///
/// The token is refreshed (if needed) before the inner handler runs, then
/// exposed as the `Authorization: Bearer` header and a [`ProviderToken`]
/// extension. The request's `Cookie` header is rewritten to the refreshed
/// session, so handlers building their own
/// [`cookie_store`](AuthState::cookie_store) see it too. Refreshed or cleared
/// cookies are appended to the response unless the handler set them itself.
/// Requests under the auth path pass through untouched.
///
/// ```rust,ignore
/// let api = Router::new().route("/api/spotify/me", get(me));
/// let app = auth_routes(&state).merge(with_fresh_tokens(api, &state));
/// ```
pub fn with_fresh_tokens(router: Router, state: &AuthState) -> Router {
    router.layer(middleware::from_fn_with_state(state.clone(), intercept))
}

async fn intercept(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if is_auth_path(request.uri().path(), &state.settings.auth_path) {
        return next.run(request).await;
    }

    let store = state.cookie_store(jar);
    let token = state.lifecycle().access_token(&store).await;
    let pending = pending_cookies(store.into_jar());
    if !pending.is_empty() {
        forward_pending_cookies(request.headers_mut(), &pending);
    }

    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {}", token.expose())) {
            Ok(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("Access token is not a valid header value"),
        }
        request.extensions_mut().insert(ProviderToken(token));
    }

    let mut response = next.run(request).await;
    append_pending_cookies(response.headers_mut(), pending);
    response
}

fn is_auth_path(path: &str, auth_path: &str) -> bool {
    path.strip_prefix(auth_path)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `Set-Cookie` values for the changes recorded in `jar`.
fn pending_cookies(jar: PrivateCookieJar) -> Vec<HeaderValue> {
    let response = (jar, ()).into_response();
    response.headers().get_all(SET_COOKIE).iter().cloned().collect()
}

fn parse_set_cookie(value: &HeaderValue) -> Option<Cookie<'static>> {
    value
        .to_str()
        .ok()
        .and_then(|v| Cookie::parse(v.to_string()).ok())
}

fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.value().is_empty() || cookie.max_age() == Some(Duration::ZERO)
}

/// Apply `pending` to the request's `Cookie` header.
fn forward_pending_cookies(headers: &mut HeaderMap, pending: &[HeaderValue]) {
    let mut cookies: Vec<(String, String)> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| Cookie::split_parse(v.to_string()))
        .filter_map(Result::ok)
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect();

    for cookie in pending.iter().filter_map(parse_set_cookie) {
        cookies.retain(|(name, _)| name != cookie.name());
        if !is_removal(&cookie) {
            cookies.push((cookie.name().to_string(), cookie.value().to_string()));
        }
    }

    headers.remove(COOKIE);
    if cookies.is_empty() {
        return;
    }
    let header = cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    match HeaderValue::from_str(&header) {
        Ok(value) => {
            headers.insert(COOKIE, value);
        }
        Err(_) => tracing::warn!("Refreshed cookies are not a valid header value"),
    }
}

/// Append `pending` to the response, skipping cookies the handler already set.
fn append_pending_cookies(headers: &mut HeaderMap, pending: Vec<HeaderValue>) {
    let handler_set: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(parse_set_cookie)
        .map(|c| c.name().to_string())
        .collect();

    for value in pending {
        let overridden = parse_set_cookie(&value)
            .is_some_and(|c| handler_set.iter().any(|name| name == c.name()));
        if !overridden {
            headers.append(SET_COOKIE, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn auth_path_matching() {
        assert!(is_auth_path("/api/auth/spotify", "/api/auth/spotify"));
        assert!(is_auth_path("/api/auth/spotify/refresh", "/api/auth/spotify"));
        assert!(!is_auth_path("/api/auth/spotifyx", "/api/auth/spotify"));
        assert!(!is_auth_path("/api/spotify/me", "/api/auth/spotify"));
    }

    #[test]
    fn forwarded_cookies_replace_and_remove() {
        let mut headers = header_map(&[("cookie", "access_token=old; refresh_token=r; theme=dark")]);
        let pending = vec![
            HeaderValue::from_static("access_token=new; Path=/; Max-Age=3600"),
            HeaderValue::from_static("refresh_token=; Path=/; Max-Age=0"),
        ];

        forward_pending_cookies(&mut headers, &pending);

        let cookie = headers[COOKIE].to_str().unwrap();
        assert!(cookie.contains("theme=dark"));
        assert!(cookie.contains("access_token=new"));
        assert!(!cookie.contains("access_token=old"));
        assert!(!cookie.contains("refresh_token"));
    }

    #[test]
    fn handler_cookies_win_over_pending() {
        let mut headers = header_map(&[("set-cookie", "access_token=from-handler; Path=/")]);
        let pending = vec![
            HeaderValue::from_static("access_token=from-layer; Path=/"),
            HeaderValue::from_static("token_expires_at=1; Path=/"),
        ];

        append_pending_cookies(&mut headers, pending);

        let values: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(
            values,
            ["access_token=from-handler; Path=/", "token_expires_at=1; Path=/"]
        );
    }
}
