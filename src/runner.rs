//! Runs the end-to-end suites against a live server
//!
//! The suites are ordinary `cargo test` integration tests marked `#[ignore]`,
//! so a plain `cargo test` never needs a server. The runner starts or attaches
//! to one, then invokes cargo with `--ignored` and the server's address in the
//! environment.

use crate::config::{
    HarnessConfig, ENV_BASE_URL, ENV_CONFIG, ENV_RUN_SLOW, ENV_TIMEOUT_SECS,
};
use crate::error::{HarnessError, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::info;

/// Integration test targets that talk to a live server.
pub const E2E_SUITES: &[&str] = &[
    "e2e_routing_tests",
    "e2e_auth_tests",
    "e2e_admin_fixture_tests",
    "e2e_permissions_tests",
    "e2e_setup_tests",
];

/// Tests whose name starts with this only run with `--run-slow`.
pub const SLOW_TEST_PREFIX: &str = "slow_";

/// Arguments for `cargo`, extra arguments going to the test binaries.
pub fn cargo_test_args(run_slow: bool, extra: &[String]) -> Vec<String> {
    let mut args = vec!["test".to_string()];
    for suite in E2E_SUITES {
        args.push("--test".to_string());
        args.push(suite.to_string());
    }

    args.push("--".to_string());
    args.push("--ignored".to_string());
    // Suites share one server; keep them off each other's state.
    args.push("--test-threads=1".to_string());
    if !run_slow {
        args.push("--skip".to_string());
        args.push(SLOW_TEST_PREFIX.to_string());
    }
    args.extend(extra.iter().cloned());
    args
}

/// Environment handed to the test processes.
pub fn suite_env(
    config: &HarnessConfig,
    base_url: &str,
    config_path: Option<&Path>,
) -> Vec<(&'static str, String)> {
    let mut vars = config.environment.vars();
    vars.push((ENV_BASE_URL, base_url.to_string()));
    vars.push((ENV_RUN_SLOW, config.run_slow.to_string()));
    vars.push((
        ENV_TIMEOUT_SECS,
        config.request_timeout.as_secs().to_string(),
    ));
    if let Some(path) = config_path {
        let path = absolute(path);
        vars.push((ENV_CONFIG, path.to_string_lossy().to_string()));
    }
    vars
}

/// Directory cargo is run from: the crate holding the suites.
pub fn suite_dir() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
}

// The suites run from `suite_dir`, so relative paths would change meaning.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Runs the suites and returns cargo's exit status.
pub async fn run_suites(
    config: &HarnessConfig,
    base_url: &str,
    config_path: Option<&Path>,
    extra: &[String],
) -> Result<ExitStatus> {
    let args = cargo_test_args(config.run_slow, extra);
    info!("Running cargo {}", args.join(" "));

    let status = Command::new("cargo")
        .args(&args)
        .current_dir(suite_dir())
        .envs(suite_env(config, base_url, config_path))
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| HarnessError::Config(format!("failed to run cargo: {}", e)))?;

    info!("Test run finished: {}", status);
    Ok(status)
}
