use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::Error;
use crate::lifecycle::TokenLifecycle;
use crate::session::SessionStore;

/// Web API client whose requests always carry a fresh bearer token.
///
/// Tokens are resolved through [`TokenLifecycle::access_token`] before the
/// request is sent. A `401` from the API triggers one reactive refresh and a
/// single retry.
#[derive(Debug, Clone)]
pub struct ApiClient {
    lifecycle: Arc<TokenLifecycle>,
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Share the lifecycle's HTTP client and API base URL.
    #[must_use]
    pub fn new(lifecycle: Arc<TokenLifecycle>) -> Self {
        let http = lifecycle.client().http().clone();
        let base_url = lifecycle.client().config().api_url().clone();
        Self {
            lifecycle,
            http,
            base_url,
        }
    }

    /// Build a request for `path`, relative to the API base URL.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `path` cannot be joined onto the base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, Error> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Configuration(format!("invalid API path {path:?}: {e}")))?;
        Ok(self.http.request(method, url))
    }

    /// Send `request` with the session's access token.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] when the session has no usable token,
    /// refresh errors from the reactive retry, or [`Error::Http`].
    pub async fn send<S: SessionStore>(
        &self,
        store: &S,
        request: RequestBuilder,
    ) -> Result<Response, Error> {
        let token = self
            .lifecycle
            .access_token(store)
            .await
            .ok_or(Error::Unauthenticated)?;

        let retry = request.try_clone();
        let response = request.bearer_auth(token.expose()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(retry) = retry else {
            return Ok(response);
        };

        tracing::debug!("Spotify rejected access token, refreshing before retry");
        let record = self.lifecycle.force_refresh(store, Some(&token)).await?;
        let token = record.access_token().ok_or(Error::Unauthenticated)?;

        retry
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(Into::into)
    }

    /// `GET` a JSON resource. `204 No Content` yields `None`.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`Error::Api`] for non-success statuses.
    pub async fn get_json<T: DeserializeOwned, S: SessionStore>(
        &self,
        store: &S,
        path: &str,
    ) -> Result<Option<T>, Error> {
        let request = self.request(Method::GET, path)?;
        let response = self.send(store, request).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, detail });
        }
        Ok(Some(response.json::<T>().await?))
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, ServerGuard};

    use super::*;
    use crate::credentials::AppCredentials;
    use crate::oauth::{AuthClient, ProviderConfig};
    use crate::session::{MemorySessionStore, SessionRecord};
    use crate::types::{AccessToken, RefreshToken, now_millis};

    fn api(server: &ServerGuard) -> ApiClient {
        let config = ProviderConfig::new("https://vinyl.test/callback".parse().unwrap())
            .with_token_url(format!("{}/api/token", server.url()).parse().unwrap())
            .with_api_url(format!("{}/v1/", server.url()).parse().unwrap());
        ApiClient::new(Arc::new(TokenLifecycle::new(AuthClient::new(config))))
    }

    fn store(access: &str, expires_at: i64) -> MemorySessionStore {
        MemorySessionStore::with_record(SessionRecord::restore(
            Some(AccessToken::new(access)),
            Some(RefreshToken::new("r-1")),
            Some(expires_at),
            Some(AppCredentials::new("id", "secret")),
        ))
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/v1/me")
            .match_header("authorization", "Bearer a-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"listener"}"#)
            .create_async()
            .await;
        let api = api(&server);

        let body: Option<serde_json::Value> = api
            .get_json(&store("a-1", now_millis() + 60_000), "/me")
            .await
            .unwrap();

        me.assert_async().await;
        assert_eq!(body.unwrap()["id"], "listener");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_the_call() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/api/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a-2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/v1/me")
            .match_header("authorization", "Bearer a-2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let api = api(&server);

        let _: Option<serde_json::Value> = api.get_json(&store("a-1", 0), "me").await.unwrap();

        refresh.assert_async().await;
        me.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_response_triggers_one_refresh_and_retry() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/v1/me/player")
            .match_header("authorization", "Bearer a-1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a-2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/v1/me/player")
            .match_header("authorization", "Bearer a-2")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let api = api(&server);
        let store = store("a-1", now_millis() + 60_000);

        let playback: Option<serde_json::Value> = api.get_json(&store, "me/player").await.unwrap();

        assert!(playback.is_none());
        rejected.assert_async().await;
        refresh.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn missing_session_is_unauthenticated() {
        let server = mockito::Server::new_async().await;
        let api = api(&server);

        let err = api
            .get_json::<serde_json::Value, _>(&MemorySessionStore::new(), "me")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unauthenticated));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _premium = server
            .mock("GET", "/v1/me/player")
            .with_status(403)
            .with_body("Premium required")
            .create_async()
            .await;
        let api = api(&server);

        let err = api
            .get_json::<serde_json::Value, _>(&store("a-1", now_millis() + 60_000), "me/player")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Api { status: 403, .. }));
    }
}
