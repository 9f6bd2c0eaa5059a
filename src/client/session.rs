//! Per-client session state
//!
//! The session replaces an implicit cookie jar: token cookies live in named
//! fields, every request reads them from here and every response writes them
//! back here.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// A cookie as set by a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<Duration>,
    pub expires: Option<SystemTime>,
}

impl ResponseCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            expires: None,
        }
    }

    pub(crate) fn from_reqwest(cookie: &reqwest::cookie::Cookie<'_>) -> Self {
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            max_age: cookie.max_age(),
            expires: cookie.expires(),
        }
    }

    /// A cookie the server sent in order to delete it (logout, revocation).
    pub fn is_removal(&self) -> bool {
        if self.value.is_empty() {
            return true;
        }
        if self.max_age == Some(Duration::ZERO) {
            return true;
        }
        matches!(self.expires, Some(at) if at <= SystemTime::now())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    other: BTreeMap<String, String>,
}

impl Session {
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            ACCESS_TOKEN_COOKIE => self.access_token.as_deref(),
            REFRESH_TOKEN_COOKIE => self.refresh_token.as_deref(),
            _ => self.other.get(name).map(String::as_str),
        }
    }

    /// Sets a cookie, replacing any previous value with the same name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match name {
            ACCESS_TOKEN_COOKIE => self.access_token = Some(value),
            REFRESH_TOKEN_COOKIE => self.refresh_token = Some(value),
            _ => {
                self.other.insert(name.to_string(), value);
            }
        }
    }

    pub fn remove(&mut self, name: &str) {
        match name {
            ACCESS_TOKEN_COOKIE => self.access_token = None,
            REFRESH_TOKEN_COOKIE => self.refresh_token = None,
            _ => {
                self.other.remove(name);
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Session::default();
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.other.is_empty()
    }

    /// Applies the cookies set by a response, in header order.
    pub fn apply<'a>(&mut self, cookies: impl IntoIterator<Item = &'a ResponseCookie>) {
        for cookie in cookies {
            if cookie.is_removal() {
                self.remove(&cookie.name);
            } else {
                self.set(&cookie.name, cookie.value.clone());
            }
        }
    }

    /// Value for the `Cookie` request header, `None` when there is nothing to send.
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<String> = self
            .access_token
            .iter()
            .map(|v| format!("{}={}", ACCESS_TOKEN_COOKIE, v))
            .chain(
                self.refresh_token
                    .iter()
                    .map(|v| format!("{}={}", REFRESH_TOKEN_COOKIE, v)),
            )
            .chain(self.other.iter().map(|(k, v)| format!("{}={}", k, v)))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}
