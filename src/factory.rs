//! Client factory
//!
//! Produces authenticated clients whose authorization surface is exactly a
//! requested permission set, by provisioning a fresh role and user through the
//! admin API. Resources created along the way are never deleted; server state
//! is disposable per test session.

use crate::auth::{create_test_role, create_test_user, grant_permissions, login_user, Credentials};
use crate::client::ApiClient;
use crate::error::{HarnessError, Result};
use crate::permissions::PermissionSet;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Pin given to every provisioned user.
pub const DEFAULT_FACTORY_PIN: &str = "1234";

/// A client logged in as a freshly provisioned user.
pub struct ProvisionedClient {
    pub client: ApiClient,
    pub role_id: String,
    pub user_id: String,
    pub credentials: Credentials,
    pub permissions: PermissionSet,
}

#[derive(Debug, Clone)]
pub struct ClientFactory {
    base_url: String,
    timeout: Duration,
    admin_credentials: Credentials,
    user_pin: String,
}

impl ClientFactory {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        admin_credentials: Credentials,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            admin_credentials,
            user_pin: DEFAULT_FACTORY_PIN.to_string(),
        }
    }

    pub fn with_user_pin(mut self, pin: impl Into<String>) -> Self {
        self.user_pin = pin.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Opens a new client logged in with the admin credentials.
    pub async fn admin_client(&self) -> Result<ApiClient> {
        let client = ApiClient::open(&self.base_url, self.timeout)?;
        login_user(&client, Some(&self.admin_credentials), Some(200)).await?;
        Ok(client)
    }

    /// Opens a new unauthenticated client.
    pub fn public_client(&self) -> Result<ApiClient> {
        ApiClient::open(&self.base_url, self.timeout)
    }

    /// Returns a client authorized exactly for `permissions`.
    pub async fn create_client<I, S>(&self, permissions: I) -> Result<ApiClient>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let permissions = PermissionSet::new(permissions)?;
        Ok(self.provision(&permissions).await?.client)
    }

    /// Provisions role and user for `permissions` and logs in as that user.
    ///
    /// An empty set is rejected: the server refuses to log in users whose
    /// role grants nothing.
    pub async fn provision(&self, permissions: &PermissionSet) -> Result<ProvisionedClient> {
        if permissions.is_empty() {
            return Err(HarnessError::Config(
                "cannot provision a client without permissions".to_string(),
            ));
        }

        let admin = self.admin_client().await?;

        let role_name = unique_name("e2e-role");
        let role_id = create_test_role(&admin, &role_name).await?;
        grant_permissions(&admin, &role_id, permissions.iter()).await?;

        let credentials = Credentials::new(unique_name("e2e-user"), self.user_pin.clone());
        let user_id = create_test_user(&admin, &credentials.name, &credentials.pin, &role_id).await?;
        admin.close();

        let client = ApiClient::open(&self.base_url, self.timeout)?;
        login_user(&client, Some(&credentials), Some(200)).await?;

        info!(
            "Provisioned {} (role {}) with permissions {}",
            credentials.name, role_id, permissions
        );

        Ok(ProvisionedClient {
            client,
            role_id,
            user_id,
            credentials,
            permissions: permissions.clone(),
        })
    }
}

/// `<prefix>-<uuid>`, unique across runs against the same server.
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}
