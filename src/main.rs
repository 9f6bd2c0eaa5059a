use ambrosia_e2e::config::{CliConfig, FileConfig, HarnessConfig};
use ambrosia_e2e::runner::run_suites;
use ambrosia_e2e::server::ServerHandle;
use ambrosia_e2e::setup::{is_initialized, DatabaseInitializer, SETUP_PATH};
use ambrosia_e2e::ApiClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Attach to a server already running at this URL.
    #[clap(long)]
    pub base_url: Option<String>,

    /// Server executable to spawn for the test run.
    #[clap(long, value_parser = parse_path)]
    pub server_program: Option<PathBuf>,

    /// Extra argument for the spawned server. Repeatable.
    #[clap(long = "server-arg", allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Port for the spawned server. A free one is picked if not set.
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Per-request timeout in seconds.
    #[clap(long, default_value_t = ambrosia_e2e::client::DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// How long to wait for the server to become healthy, in seconds.
    #[clap(long, default_value_t = ambrosia_e2e::server::DEFAULT_STARTUP_TIMEOUT_SECS)]
    pub startup_timeout_secs: u64,

    /// Also run tests tagged as slow.
    #[clap(long)]
    pub run_slow: bool,

    /// Log level passed to the server and test processes.
    #[clap(long)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            base_url: self.base_url.clone(),
            server_program: self.server_program.clone(),
            server_args: self.server_args.clone(),
            port: self.port,
            request_timeout_secs: self.timeout_secs,
            startup_timeout_secs: self.startup_timeout_secs,
            run_slow: self.run_slow,
            testing: None,
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start or attach to the server, initialize it and run the suites.
    Run {
        /// Arguments forwarded to the test binaries.
        #[clap(last = true)]
        test_args: Vec<String>,
    },
    /// Only run the database initialization fixture.
    InitDb,
    /// Check server health and report the setup status.
    Probe,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = HarnessConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let server = ServerHandle::start(
        &config.server,
        &config.environment,
        &config.health_path,
        config.startup_timeout,
    )
    .await
    .context("Server did not start")?;
    let base_url = server.base_url().to_string();
    if server.is_spawned() {
        info!("Using spawned server at {}", base_url);
    } else {
        info!("Using running server at {}", base_url);
    }

    let command = cli_args.command.unwrap_or(Command::Run {
        test_args: Vec::new(),
    });
    let result = match command {
        Command::Probe => probe(&config, &base_url).await,
        Command::InitDb => init_db(&config, &base_url).await.map(exit_code),
        Command::Run { test_args } => {
            run(&config, &base_url, cli_args.config.as_deref(), &test_args).await
        }
    };

    if let Err(e) = server.shutdown().await {
        error!("Failed to stop server: {}", e);
    }
    result
}

async fn probe(config: &HarnessConfig, base_url: &str) -> Result<ExitCode> {
    let client = ApiClient::open(base_url, config.request_timeout)?;
    let response = client.get(SETUP_PATH).await?;
    let initialized = is_initialized(response.status_code(), response.bytes());
    client.close();

    info!("Server at {} is healthy", base_url);
    println!("initialized: {}", initialized);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Returns whether the server ended up initialized.
async fn init_db(config: &HarnessConfig, base_url: &str) -> Result<bool> {
    let client = ApiClient::open(base_url, config.request_timeout)?;
    let mut initializer =
        DatabaseInitializer::new(config.setup_payload.clone(), config.commit_delay);
    let outcome = initializer.run(&client).await;
    client.close();

    match outcome {
        Ok(outcome) => {
            println!("{:?}", outcome);
            Ok(true)
        }
        Err(e) => {
            error!("Database initialization failed: {}", e);
            Ok(false)
        }
    }
}

async fn run(
    config: &HarnessConfig,
    base_url: &str,
    config_path: Option<&std::path::Path>,
    test_args: &[String],
) -> Result<ExitCode> {
    if !init_db(config, base_url).await? {
        return Ok(ExitCode::FAILURE);
    }

    let status = run_suites(config, base_url, config_path, test_args).await?;
    if status.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(status.code().unwrap_or(1).clamp(1, 255) as u8))
    }
}
