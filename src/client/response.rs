//! Buffered HTTP response
//!
//! The body is read eagerly so assertions can decode it any number of times
//! and quote it in failure messages.

use super::session::ResponseCookie;
use crate::error::{HarnessError, Result};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::Duration;

/// Maximum number of characters of a body quoted in error messages.
pub const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    url: String,
    headers: HeaderMap,
    cookies: Vec<ResponseCookie>,
    body: Vec<u8>,
    elapsed: Duration,
}

impl ApiResponse {
    pub(crate) async fn read(response: reqwest::Response, elapsed: Duration) -> Result<Self> {
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let cookies = response
            .cookies()
            .map(|c| ResponseCookie::from_reqwest(&c))
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Self {
            status,
            url,
            headers,
            cookies,
            body,
            elapsed,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        status: u16,
        headers: HeaderMap,
        cookies: Vec<ResponseCookie>,
        body: &str,
    ) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            url: "http://127.0.0.1:9154/test".to_string(),
            headers,
            cookies,
            body: body.as_bytes().to_vec(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Final URL of the request, after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, `None` if absent or not valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Cookies set by this response.
    pub fn cookies(&self) -> &[ResponseCookie] {
        &self.cookies
    }

    /// Value of a live cookie set by this response. A cookie the response
    /// clears (empty, `Max-Age=0` or expired) counts as absent.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .rev()
            .find(|c| c.name == name)
            .filter(|c| !c.is_removal())
            .map(|c| c.value.as_str())
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            HarnessError::Decode(format!(
                "{} from {} is not the expected JSON ({}): {}",
                self.status,
                self.url,
                e,
                self.body_excerpt()
            ))
        })
    }

    pub fn json_value(&self) -> Result<serde_json::Value> {
        self.json()
    }

    /// First [`BODY_EXCERPT_LEN`] characters of the body.
    pub fn body_excerpt(&self) -> String {
        let text = self.text();
        let mut excerpt: String = text.chars().take(BODY_EXCERPT_LEN).collect();
        if text.chars().count() > BODY_EXCERPT_LEN {
            excerpt.push_str("...");
        }
        excerpt
    }
}
