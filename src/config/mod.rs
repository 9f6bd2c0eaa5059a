mod file_config;

pub use file_config::{FactoryFileConfig, FileConfig, ServerFileConfig, SetupFileConfig};

use crate::client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::factory::DEFAULT_FACTORY_PIN;
use crate::server::{
    ServerMode, SpawnConfig, DEFAULT_HEALTH_PATH, DEFAULT_PORT_ARG, DEFAULT_STARTUP_TIMEOUT_SECS,
};
use crate::setup::{SetupPayload, DEFAULT_COMMIT_DELAY};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables read by the in-test session gate.
pub const ENV_BASE_URL: &str = "AMBROSIA_BASE_URL";
pub const ENV_CONFIG: &str = "AMBROSIA_CONFIG";
pub const ENV_RUN_SLOW: &str = "AMBROSIA_RUN_SLOW";
pub const ENV_TIMEOUT_SECS: &str = "AMBROSIA_TIMEOUT_SECS";

/// Environment variables signalling test mode and verbosity to collaborating processes.
pub const ENV_TESTING: &str = "TESTING";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub base_url: Option<String>,
    pub server_program: Option<PathBuf>,
    pub server_args: Vec<String>,
    pub port: Option<u16>,
    pub request_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub run_slow: bool,
    pub testing: Option<bool>,
    pub log_level: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            server_program: None,
            server_args: Vec::new(),
            port: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
            run_slow: false,
            testing: None,
            log_level: None,
        }
    }
}

/// Test-mode settings handed explicitly to the server and test processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEnvironment {
    pub testing: bool,
    pub log_level: String,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self {
            testing: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl TestEnvironment {
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_TESTING, self.testing.to_string()),
            (ENV_LOG_LEVEL, self.log_level.clone()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server: ServerMode,
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
    pub health_path: String,
    pub commit_delay: Duration,
    pub run_slow: bool,
    pub environment: TestEnvironment,
    pub setup_payload: SetupPayload,
    pub factory_user_pin: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerMode::Attach {
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            commit_delay: DEFAULT_COMMIT_DELAY,
            run_slow: false,
            environment: TestEnvironment::default(),
            setup_payload: SetupPayload::default(),
            factory_user_pin: DEFAULT_FACTORY_PIN.to_string(),
        }
    }
}

impl HarnessConfig {
    /// Attach to an already running server with default settings.
    pub fn attach(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerMode::Attach {
                base_url: base_url.into(),
            },
            ..Default::default()
        }
    }

    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let server_file = file.server.unwrap_or_default();

        let base_url = file.base_url.or_else(|| cli.base_url.clone());
        let program = server_file
            .program
            .map(PathBuf::from)
            .or_else(|| cli.server_program.clone());

        let server = match program {
            Some(program) => {
                if base_url.is_some() {
                    bail!("base_url and a server program are mutually exclusive");
                }
                let port = server_file.port.or(cli.port).unwrap_or(0);
                let port_arg = match server_file.port_arg {
                    Some(arg) if arg.is_empty() => None,
                    Some(arg) => Some(arg),
                    None => Some(DEFAULT_PORT_ARG.to_string()),
                };
                if port_arg.is_none() && port == 0 {
                    bail!("server port must be set when the server takes no port argument");
                }
                ServerMode::Spawn(SpawnConfig {
                    program,
                    args: server_file
                        .args
                        .unwrap_or_else(|| cli.server_args.clone()),
                    host: server_file
                        .host
                        .unwrap_or_else(|| "127.0.0.1".to_string()),
                    port,
                    port_arg,
                    working_dir: server_file.working_dir.map(PathBuf::from),
                })
            }
            None => {
                let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    bail!("base_url must be an http(s) URL: {}", base_url);
                }
                ServerMode::Attach { base_url }
            }
        };

        let request_timeout_secs = file
            .request_timeout_secs
            .unwrap_or(cli.request_timeout_secs);
        if request_timeout_secs == 0 {
            bail!("request timeout must be greater than zero");
        }
        let startup_timeout_secs = file
            .startup_timeout_secs
            .unwrap_or(cli.startup_timeout_secs);

        let health_path = file
            .health_path
            .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string());
        let commit_delay = file
            .commit_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_COMMIT_DELAY);
        let run_slow = file.run_slow.unwrap_or(cli.run_slow);

        let environment = TestEnvironment {
            testing: file.testing.or(cli.testing).unwrap_or(true),
            log_level: file
                .log_level
                .or_else(|| cli.log_level.clone())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };

        // Setup payload - merge file config with defaults
        let setup_file = file.setup.unwrap_or_default();
        let defaults = SetupPayload::default();
        let setup_payload = SetupPayload {
            business_type: setup_file.business_type.unwrap_or(defaults.business_type),
            user_name: setup_file.user_name.unwrap_or(defaults.user_name),
            user_password: setup_file.user_password.unwrap_or(defaults.user_password),
            user_pin: setup_file.user_pin.unwrap_or(defaults.user_pin),
            business_name: setup_file.business_name.unwrap_or(defaults.business_name),
            business_address: setup_file
                .business_address
                .unwrap_or(defaults.business_address),
            business_phone: setup_file.business_phone.unwrap_or(defaults.business_phone),
            business_email: setup_file.business_email.unwrap_or(defaults.business_email),
            business_currency: setup_file
                .business_currency
                .unwrap_or(defaults.business_currency),
        };

        let factory_user_pin = file
            .factory
            .and_then(|f| f.user_pin)
            .unwrap_or_else(|| DEFAULT_FACTORY_PIN.to_string());

        Ok(Self {
            server,
            request_timeout: Duration::from_secs(request_timeout_secs),
            startup_timeout: Duration::from_secs(startup_timeout_secs),
            health_path,
            commit_delay,
            run_slow,
            environment,
            setup_payload,
            factory_user_pin,
        })
    }

    /// Resolve configuration for a test process from its environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HarnessConfig::from_env`], reading variables through `lookup`.
    ///
    /// `AMBROSIA_BASE_URL` always means "attach", even when the config file
    /// names a server program: the runner exports it after spawning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file_config = match lookup(ENV_CONFIG) {
            Some(path) => Some(FileConfig::load(Path::new(&path))?),
            None => None,
        };

        let request_timeout_secs = match lookup(ENV_TIMEOUT_SECS) {
            Some(value) => value
                .parse()
                .with_context(|| format!("{} is not a number: {}", ENV_TIMEOUT_SECS, value))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let testing = match lookup(ENV_TESTING) {
            Some(value) => Some(parse_bool(&value).with_context(|| {
                format!("{} is not a boolean: {}", ENV_TESTING, value)
            })?),
            None => None,
        };

        let run_slow = match lookup(ENV_RUN_SLOW) {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("{} is not a boolean: {}", ENV_RUN_SLOW, value))?,
            None => false,
        };

        let cli = CliConfig {
            request_timeout_secs,
            run_slow,
            testing,
            log_level: lookup(ENV_LOG_LEVEL),
            ..Default::default()
        };

        let mut config = match lookup(ENV_BASE_URL) {
            Some(base_url) => {
                let mut file = file_config.unwrap_or_default();
                file.base_url = None;
                file.server = None;
                Self::resolve(
                    &CliConfig {
                        base_url: Some(base_url),
                        ..cli
                    },
                    Some(file),
                )?
            }
            None => Self::resolve(&cli, file_config)?,
        };

        // An explicit environment flag wins over the file.
        if lookup(ENV_RUN_SLOW).is_some() {
            config.run_slow = run_slow;
        }
        Ok(config)
    }

    /// Base URL when attaching; `None` when the server is spawned on demand.
    pub fn attach_url(&self) -> Option<&str> {
        match &self.server {
            ServerMode::Attach { base_url } => Some(base_url),
            ServerMode::Spawn(_) => None,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("invalid boolean: {}", other),
    }
}
