use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, Request};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key};
use time::Duration;

/// Minimal cookie-carrying client for router tests. Ignores paths.
#[derive(Debug, Default)]
pub(crate) struct Browser {
    cookies: BTreeMap<String, String>,
}

impl Browser {
    pub(crate) fn absorb(&mut self, response: &Response) {
        for value in response.headers().get_all(SET_COOKIE) {
            let Some(cookie) = value
                .to_str()
                .ok()
                .and_then(|v| Cookie::parse(v.to_string()).ok())
            else {
                continue;
            };
            if cookie.value().is_empty() || cookie.max_age() == Some(Duration::ZERO) {
                self.cookies.remove(cookie.name());
            } else {
                self.cookies
                    .insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
    }

    pub(crate) fn absorb_jar(&mut self, jar: PrivateCookieJar) {
        let response = (jar, ()).into_response();
        self.absorb(&response);
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    fn cookie_header(&self) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }
        let header = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }

    pub(crate) fn request(&self, method: Method, uri: &str, body: Body) -> Request<Body> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        if let Some(header) = self.cookie_header() {
            request.headers_mut().insert(COOKIE, header);
        }
        request
    }

    pub(crate) fn jar(&self, key: &Key) -> PrivateCookieJar {
        let mut headers = HeaderMap::new();
        if let Some(header) = self.cookie_header() {
            headers.insert(COOKIE, header);
        }
        PrivateCookieJar::from_headers(&headers, key.clone())
    }
}

/// The jar the next request would carry after `jar`'s response.
pub(crate) fn next_request_jar(jar: PrivateCookieJar, key: &Key) -> PrivateCookieJar {
    let mut browser = Browser::default();
    browser.absorb_jar(jar);
    browser.jar(key)
}
