//! Database initialization fixture
//!
//! Makes sure the server holds a business and a default admin user before
//! any test runs. The server may already hold state from a previous run, so
//! every "already there" answer counts as success.

use crate::client::ApiClient;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

pub const SETUP_PATH: &str = "/initial-setup";

/// Message fragment the server reports when the admin user already exists.
pub const DUPLICATE_USER_MARKER: &str = "UNIQUE constraint failed: users.name";

/// Pause after a fresh setup so the server's commit is visible to later requests.
pub const DEFAULT_COMMIT_DELAY: Duration = Duration::from_secs(1);

/// Body of POST /initial-setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub business_type: String,
    pub user_name: String,
    pub user_password: String,
    pub user_pin: String,
    pub business_name: String,
    pub business_address: String,
    pub business_phone: String,
    pub business_email: String,
    pub business_currency: String,
}

impl Default for SetupPayload {
    fn default() -> Self {
        Self {
            business_type: "store".to_string(),
            user_name: "cooluser1".to_string(),
            user_password: "password123".to_string(),
            user_pin: "0000".to_string(),
            business_name: "Test Store".to_string(),
            business_address: "123 Test St".to_string(),
            business_phone: "1234567890".to_string(),
            business_email: "test@example.com".to_string(),
            business_currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Unchecked,
    Checking,
    AlreadyInitialized,
    Initializing,
    Initialized,
    ConflictAlreadyInitialized,
    Failed,
}

impl SetupState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SetupState::AlreadyInitialized
                | SetupState::Initialized
                | SetupState::ConflictAlreadyInitialized
                | SetupState::Failed
        )
    }

    pub fn is_success(&self) -> bool {
        self.is_terminal() && *self != SetupState::Failed
    }
}

/// How a successful initialization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The status check reported `initialized: true`.
    AlreadyInitialized,
    /// This run created the business and the admin user.
    Initialized,
    /// The setup endpoint answered 409.
    Conflict,
    /// The setup endpoint failed on the admin user's unique name.
    UserAlreadyExists,
}

impl SetupOutcome {
    pub fn state(&self) -> SetupState {
        match self {
            SetupOutcome::AlreadyInitialized | SetupOutcome::UserAlreadyExists => {
                SetupState::AlreadyInitialized
            }
            SetupOutcome::Initialized => SetupState::Initialized,
            SetupOutcome::Conflict => SetupState::ConflictAlreadyInitialized,
        }
    }

    /// Whether this run changed server state.
    pub fn performed_setup(&self) -> bool {
        *self == SetupOutcome::Initialized
    }
}

#[derive(Debug, Deserialize)]
struct SetupStatus {
    #[serde(default)]
    initialized: bool,
}

#[derive(Debug, Deserialize)]
struct SetupError {
    message: String,
}

/// Reads the answer of GET /initial-setup. Anything other than a 200 with
/// `initialized: true` means setup must be attempted.
pub fn is_initialized(status: u16, body: &[u8]) -> bool {
    if status != 200 {
        return false;
    }
    serde_json::from_slice::<SetupStatus>(body)
        .map(|s| s.initialized)
        .unwrap_or(false)
}

/// Classifies the answer of POST /initial-setup. `Err` carries the reason
/// the session cannot continue.
pub fn classify_setup_response(
    status: u16,
    body: &str,
) -> std::result::Result<SetupOutcome, String> {
    match status {
        201 => Ok(SetupOutcome::Initialized),
        409 => Ok(SetupOutcome::Conflict),
        500 => match serde_json::from_str::<SetupError>(body) {
            Ok(err) if err.message.contains(DUPLICATE_USER_MARKER) => {
                Ok(SetupOutcome::UserAlreadyExists)
            }
            Ok(err) => Err(format!(
                "Initial setup failed with status 500: {}",
                err.message
            )),
            Err(e) => Err(format!(
                "Initial setup failed with status 500, could not parse error: {}",
                e
            )),
        },
        other => {
            let excerpt: String = body.chars().take(200).collect();
            if excerpt.is_empty() {
                Err(format!("Initial setup failed with status {}", other))
            } else {
                Err(format!(
                    "Initial setup failed with status {}: {}",
                    other, excerpt
                ))
            }
        }
    }
}

/// Drives one initialization attempt through [`SetupState`].
#[derive(Debug)]
pub struct DatabaseInitializer {
    payload: SetupPayload,
    commit_delay: Duration,
    state: SetupState,
}

impl DatabaseInitializer {
    pub fn new(payload: SetupPayload, commit_delay: Duration) -> Self {
        Self {
            payload,
            commit_delay,
            state: SetupState::Unchecked,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn payload(&self) -> &SetupPayload {
        &self.payload
    }

    /// Runs the check and, if needed, the setup. Safe to call repeatedly:
    /// every call starts over from the status check.
    pub async fn run(&mut self, client: &ApiClient) -> Result<SetupOutcome> {
        match self.run_inner(client).await {
            Ok(outcome) => {
                self.state = outcome.state();
                Ok(outcome)
            }
            Err(e) => {
                self.state = SetupState::Failed;
                error!("{}", e);
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, client: &ApiClient) -> Result<SetupOutcome> {
        self.state = SetupState::Checking;
        let check = client.get(SETUP_PATH).await?;
        if is_initialized(check.status_code(), check.bytes()) {
            info!("Database already initialized");
            return Ok(SetupOutcome::AlreadyInitialized);
        }

        self.state = SetupState::Initializing;
        info!("Attempting to initialize database with default user for tests...");
        let response = client.post(SETUP_PATH, &self.payload).await?;

        let outcome = classify_setup_response(response.status_code(), &response.text())
            .map_err(HarnessError::Setup)?;
        match outcome {
            SetupOutcome::Initialized => {
                info!("Database initialized successfully with default user");
                tokio::time::sleep(self.commit_delay).await;
            }
            SetupOutcome::Conflict => info!("Database already initialized (409 Conflict)"),
            SetupOutcome::UserAlreadyExists => {
                info!("User already exists in database, continuing with tests")
            }
            SetupOutcome::AlreadyInitialized => {}
        }
        Ok(outcome)
    }
}

/// Convenience wrapper for a single initialization run.
pub async fn ensure_initialized(
    client: &ApiClient,
    payload: &SetupPayload,
    commit_delay: Duration,
) -> Result<SetupOutcome> {
    DatabaseInitializer::new(payload.clone(), commit_delay)
        .run(client)
        .await
}
