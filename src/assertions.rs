//! Response assertions
//!
//! Every helper returns [`HarnessError::Assertion`] with both the expected and
//! the actual value, so a failing test reports what the server really said.

use crate::client::ApiResponse;
use crate::error::{HarnessError, Result};

fn with_prefix(message: Option<&str>, detail: String) -> String {
    match message {
        Some(msg) => format!("{}: {}", msg, detail),
        None => detail,
    }
}

pub fn assert_status_code(
    response: &ApiResponse,
    expected: u16,
    message: Option<&str>,
) -> Result<()> {
    if response.status_code() == expected {
        return Ok(());
    }
    Err(HarnessError::Assertion(with_prefix(
        message,
        format!(
            "expected status {}, got {} from {}. Body: {}",
            expected,
            response.status_code(),
            response.url(),
            response.body_excerpt()
        ),
    )))
}

/// Like [`assert_status_code`], for endpoints with more than one acceptable status.
pub fn assert_status_in(
    response: &ApiResponse,
    allowed: &[u16],
    message: Option<&str>,
) -> Result<()> {
    if allowed.contains(&response.status_code()) {
        return Ok(());
    }
    Err(HarnessError::Assertion(with_prefix(
        message,
        format!(
            "expected status in {:?}, got {} from {}. Body: {}",
            allowed,
            response.status_code(),
            response.url(),
            response.body_excerpt()
        ),
    )))
}

pub fn assert_response_contains(response: &ApiResponse, expected: &str) -> Result<()> {
    if response.text().contains(expected) {
        return Ok(());
    }
    Err(HarnessError::Assertion(format!(
        "expected response body to contain {:?}. Body: {}",
        expected,
        response.body_excerpt()
    )))
}

/// Every named cookie must be set live by the response.
pub fn assert_cookies_present(response: &ApiResponse, cookie_names: &[&str]) -> Result<()> {
    for name in cookie_names {
        if response.cookie(name).is_none() {
            return Err(HarnessError::Assertion(format!(
                "{} cookie should be set",
                name
            )));
        }
    }
    Ok(())
}

/// No named cookie may be left live; cookies the response clears pass.
pub fn assert_cookies_absent(response: &ApiResponse, cookie_names: &[&str]) -> Result<()> {
    for name in cookie_names {
        if response.cookie(name).is_some() {
            return Err(HarnessError::Assertion(format!(
                "{} should not be set",
                name
            )));
        }
    }
    Ok(())
}

/// The body must be JSON with a `message` field mentioning success.
pub fn assert_success_message(response: &ApiResponse) -> Result<()> {
    let body = response.json_value()?;
    let message = body.get("message").ok_or_else(|| {
        HarnessError::Assertion(format!(
            "Response should contain 'message' field. Body: {}",
            response.body_excerpt()
        ))
    })?;
    let text = message.as_str().unwrap_or_default().to_lowercase();
    if text.contains("success") {
        Ok(())
    } else {
        Err(HarnessError::Assertion(format!(
            "Response message should indicate success, got {}",
            message
        )))
    }
}

pub fn assert_header_present(response: &ApiResponse, name: &str) -> Result<()> {
    if response.has_header(name) {
        Ok(())
    } else {
        Err(HarnessError::Assertion(format!("Missing header: {}", name)))
    }
}

/// The `content-type` header must contain one of the accepted media types.
pub fn assert_content_type(response: &ApiResponse, accepted: &[&str]) -> Result<()> {
    let content_type = response.header("content-type").unwrap_or_default();
    if accepted.iter().any(|media| content_type.contains(media)) {
        Ok(())
    } else {
        Err(HarnessError::Assertion(format!(
            "Unexpected content type: {:?} (accepted: {:?})",
            content_type, accepted
        )))
    }
}
