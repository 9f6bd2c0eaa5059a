//! Ambrosia end-to-end test harness
//!
//! This library exposes the fixtures, clients and assertion helpers used by
//! the end-to-end suites under `tests/`, and by the `ambrosia-e2e` runner.

pub mod assertions;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod fixtures;
pub mod permissions;
pub mod runner;
pub mod server;
pub mod setup;

// Re-export commonly used types for convenience
pub use client::{ApiClient, ApiResponse, RequestOptions, Session};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use factory::{ClientFactory, ProvisionedClient};
pub use fixtures::TestContext;
pub use permissions::PermissionSet;
pub use setup::{DatabaseInitializer, SetupOutcome, SetupPayload, SetupState};
