//! HTTP client for end-to-end tests
//!
//! A thin wrapper over reqwest that resolves paths against a base URL,
//! carries an explicit [`Session`] across requests and buffers responses.

mod response;
mod session;

pub use response::{ApiResponse, BODY_EXCERPT_LEN};
pub use session::{ResponseCookie, Session, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};

use crate::error::Result;
use reqwest::header::COOKIE;
use reqwest::Method;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default address of a locally running Ambrosia server.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9154";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Extra options for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    json: Option<serde_json::Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// HTTP test client with an explicit cookie session
///
/// The client is a scoped resource: [`ApiClient::open`] acquires the
/// connection pool, [`ApiClient::close`] or dropping the client releases it.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    session: Mutex<Session>,
}

impl ApiClient {
    /// Opens a new unauthenticated client.
    ///
    /// Redirects are followed; nothing is retried.
    pub fn open(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::default())
            .build()?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        debug!("Opened client for {}", base_url);

        Ok(Self {
            client,
            base_url,
            timeout,
            session: Mutex::new(Session::default()),
        })
    }

    /// Releases the connection pool. Equivalent to dropping the client.
    pub fn close(self) {
        debug!("Closing client for {}", self.base_url);
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    /// Plants a cookie in the session, replacing any existing one with the same name.
    pub fn set_cookie(&self, name: &str, value: &str) {
        self.lock_session().set(name, value);
    }

    pub fn clear_session(&self) {
        self.lock_session().clear();
    }

    pub async fn get(&self, url: &str) -> Result<ApiResponse> {
        self.request(Method::GET, url, RequestOptions::default()).await
    }

    pub async fn get_with(&self, url: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::GET, url, options).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<ApiResponse> {
        let options = RequestOptions::default().json(serde_json::to_value(body)?);
        self.request(Method::POST, url, options).await
    }

    pub async fn post_with(&self, url: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::POST, url, options).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<ApiResponse> {
        let options = RequestOptions::default().json(serde_json::to_value(body)?);
        self.request(Method::PUT, url, options).await
    }

    pub async fn put_with(&self, url: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::PUT, url, options).await
    }

    pub async fn delete(&self, url: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, url, RequestOptions::default()).await
    }

    pub async fn delete_with(&self, url: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::DELETE, url, options).await
    }

    /// Sends a request and folds the cookies it sets back into the session.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let full_url = self.build_url(url);
        debug!("{} {}", method, full_url);

        let mut builder = self.client.request(method, &full_url);
        let cookie_header = self.lock_session().cookie_header();
        if let Some(cookies) = cookie_header {
            builder = builder.header(COOKIE, cookies);
        }
        for (name, value) in options.headers {
            builder = builder.header(name, value);
        }
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = options.json {
            builder = builder.json(&body);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let response = ApiResponse::read(response, started.elapsed()).await?;
        debug!("Response: {}", response.status());

        self.lock_session().apply(response.cookies());
        Ok(response)
    }

    /// Absolute URLs pass through unchanged, relative ones are joined to the base URL.
    pub fn build_url(&self, url: &str) -> String {
        if url.starts_with("http") {
            return url.to_string();
        }
        format!("{}/{}", self.base_url, url.trim_start_matches('/'))
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
