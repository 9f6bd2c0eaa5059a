//! Authentication helpers and privileged resource creation.
//!
//! Each provisioning helper performs one mutation and one assertion, so a
//! composite fixture reports exactly which step failed.

use crate::assertions::assert_status_code;
use crate::client::{ApiClient, ApiResponse, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::error::{HarnessError, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Default test user, created by the database initialization fixture.
pub const DEFAULT_TEST_USER_NAME: &str = "cooluser1";
pub const DEFAULT_TEST_USER_PIN: &str = "0000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub name: String,
    pub pin: String,
}

impl Credentials {
    pub fn new(name: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pin: pin.into(),
        }
    }

    pub fn default_test_user() -> Self {
        Self::new(DEFAULT_TEST_USER_NAME, DEFAULT_TEST_USER_PIN)
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::default_test_user()
    }
}

/// POST /auth/login
///
/// Uses the default test user when `credentials` is `None`. Pass
/// `expected_status: None` to skip the status check.
pub async fn login_user(
    client: &ApiClient,
    credentials: Option<&Credentials>,
    expected_status: Option<u16>,
) -> Result<ApiResponse> {
    let default_credentials = Credentials::default_test_user();
    let credentials = credentials.unwrap_or(&default_credentials);

    debug!("Logging in as {}", credentials.name);
    let response = client.post("/auth/login", credentials).await?;
    if let Some(expected) = expected_status {
        assert_status_code(&response, expected, None)?;
    }
    Ok(response)
}

/// POST /auth/refresh, using the refresh token in the client's session.
pub async fn refresh_session(
    client: &ApiClient,
    expected_status: Option<u16>,
) -> Result<ApiResponse> {
    let response = client.post("/auth/refresh", &json!({})).await?;
    if let Some(expected) = expected_status {
        assert_status_code(&response, expected, None)?;
    }
    Ok(response)
}

/// POST /auth/logout
pub async fn logout_user(client: &ApiClient, expected_status: Option<u16>) -> Result<ApiResponse> {
    let response = client.post("/auth/logout", &json!({})).await?;
    if let Some(expected) = expected_status {
        assert_status_code(&response, expected, None)?;
    }
    Ok(response)
}

/// Extracts `(access_token, refresh_token)` from a login or refresh response.
pub fn get_tokens_from_response(response: &ApiResponse) -> Result<(String, String)> {
    let access_token = response.cookie(ACCESS_TOKEN_COOKIE).ok_or_else(|| {
        HarnessError::Assertion("Should have accessToken after login".to_string())
    })?;
    let refresh_token = response.cookie(REFRESH_TOKEN_COOKIE).ok_or_else(|| {
        HarnessError::Assertion("Should have refreshToken after login".to_string())
    })?;
    Ok((access_token.to_string(), refresh_token.to_string()))
}

/// POST /roles, returns the new role's id.
pub async fn create_test_role(admin_client: &ApiClient, role_name: &str) -> Result<String> {
    let response = admin_client
        .post("/roles", &json!({ "role": role_name }))
        .await?;
    assert_status_code(
        &response,
        201,
        Some(&format!("Failed to create role '{}'", role_name)),
    )?;
    extract_id(&response)
}

/// PUT /roles/{id}/permissions, replacing the role's permissions.
pub async fn grant_permissions<I, S>(
    admin_client: &ApiClient,
    role_id: &str,
    permissions: I,
) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let permissions: Vec<String> = permissions
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect();
    let response = admin_client
        .put(
            &format!("/roles/{}/permissions", role_id),
            &json!({ "permissions": permissions }),
        )
        .await?;
    assert_status_code(
        &response,
        200,
        Some(&format!("Failed to grant permissions to role {}", role_id)),
    )
}

/// POST /users, returns the new user's id.
pub async fn create_test_user(
    admin_client: &ApiClient,
    name: &str,
    pin: &str,
    role_id: &str,
) -> Result<String> {
    let response = admin_client
        .post(
            "/users",
            &json!({ "name": name, "pin": pin, "role_id": role_id }),
        )
        .await?;
    assert_status_code(
        &response,
        201,
        Some(&format!("Failed to create user '{}'", name)),
    )?;
    extract_id(&response)
}

/// Reads the `id` field of a creation response. Numeric ids are stringified.
fn extract_id(response: &ApiResponse) -> Result<String> {
    let body = response.json_value()?;
    match body.get("id") {
        Some(serde_json::Value::String(id)) => Ok(id.clone()),
        Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
        _ => Err(HarnessError::Decode(format!(
            "creation response from {} has no id: {}",
            response.url(),
            response.body_excerpt()
        ))),
    }
}
