//! Session-scoped test context
//!
//! The first test to call [`TestContext::get`] waits for the server and runs
//! the database initialization fixture; every other test waits for that to
//! finish and then reuses the outcome. A failed setup is remembered, so the
//! whole session fails with the same error instead of retrying per test.

use crate::auth::{login_user, Credentials};
use crate::client::ApiClient;
use crate::config::{HarnessConfig, ENV_LOG_LEVEL};
use crate::error::{HarnessError, Result};
use crate::factory::ClientFactory;
use crate::server::{wait_for_health, ServerMode};
use crate::setup::{DatabaseInitializer, SetupOutcome};
use std::sync::Once;
use tokio::sync::OnceCell;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

static CONTEXT: OnceCell<std::result::Result<TestContext, String>> = OnceCell::const_new();
static LOGGING: Once = Once::new();

#[derive(Debug)]
pub struct TestContext {
    config: HarnessConfig,
    base_url: String,
    setup_outcome: SetupOutcome,
}

impl TestContext {
    /// Returns the process-wide context, establishing it on first use.
    pub async fn get() -> Result<&'static TestContext> {
        let context = CONTEXT
            .get_or_init(|| async {
                init_test_logging();
                let config = HarnessConfig::from_env()
                    .map_err(|e| HarnessError::Config(format!("{:#}", e)));
                match config {
                    Ok(config) => Self::establish(config).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            })
            .await;

        context
            .as_ref()
            .map_err(|e| HarnessError::Setup(e.clone()))
    }

    /// Waits for the server and runs the initialization fixture once.
    ///
    /// Only attach mode is supported here: a spawned server must outlive every
    /// test, so spawning belongs to the runner.
    pub async fn establish(config: HarnessConfig) -> Result<Self> {
        let base_url = match &config.server {
            ServerMode::Attach { base_url } => base_url.trim_end_matches('/').to_string(),
            ServerMode::Spawn(_) => {
                return Err(HarnessError::Config(
                    "tests attach to a running server; start one with the ambrosia-e2e runner \
                     or set AMBROSIA_BASE_URL"
                        .to_string(),
                ))
            }
        };

        wait_for_health(&base_url, &config.health_path, config.startup_timeout).await?;

        let client = ApiClient::open(&base_url, config.request_timeout)?;
        let mut initializer =
            DatabaseInitializer::new(config.setup_payload.clone(), config.commit_delay);
        let setup_outcome = initializer.run(&client).await.map_err(|e| match e {
            HarnessError::Setup(_) => e,
            other => HarnessError::Setup(other.to_string()),
        })?;
        client.close();

        info!("Test context ready at {} ({:?})", base_url, setup_outcome);
        Ok(Self {
            config,
            base_url,
            setup_outcome,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn setup_outcome(&self) -> SetupOutcome {
        self.setup_outcome
    }

    pub fn run_slow(&self) -> bool {
        self.config.run_slow
    }

    /// Credentials of the admin user created by the initialization fixture.
    pub fn admin_credentials(&self) -> Credentials {
        Credentials::new(
            self.config.setup_payload.user_name.clone(),
            self.config.setup_payload.user_pin.clone(),
        )
    }

    /// An unauthenticated client.
    pub fn public_client(&self) -> Result<ApiClient> {
        ApiClient::open(&self.base_url, self.config.request_timeout)
    }

    /// A client logged in as the default admin user.
    pub async fn admin_client(&self) -> Result<ApiClient> {
        let client = self.public_client()?;
        login_user(&client, Some(&self.admin_credentials()), Some(200)).await?;
        Ok(client)
    }

    pub fn client_factory(&self) -> ClientFactory {
        ClientFactory::new(
            self.base_url.clone(),
            self.config.request_timeout,
            self.admin_credentials(),
        )
        .with_user_pin(self.config.factory_user_pin.clone())
    }
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// Verbosity comes from `LOG_LEVEL`, defaulting to `info`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .with_env_var(ENV_LOG_LEVEL)
                    .from_env_lossy(),
            )
            .try_init();
    });
}
