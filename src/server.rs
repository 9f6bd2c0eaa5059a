//! Server lifecycle management
//!
//! Either attaches to a server that is already running or spawns one as a
//! child process. In both cases the handle is only returned once the health
//! endpoint answers with a success status.

use crate::config::TestEnvironment;
use crate::error::{HarnessError, Result};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_HEALTH_PATH: &str = "/api/health";
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PORT_ARG: &str = "--http-bind-port";

/// Polling interval when waiting for the server to become healthy.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout of a single health probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// The server is already running at `base_url`.
    Attach { base_url: String },
    /// Start the server as a child process.
    Spawn(SpawnConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    /// Flag used to hand the port to the server, `None` if it takes none.
    pub port_arg: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl SpawnConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 0,
            port_arg: Some(DEFAULT_PORT_ARG.to_string()),
            working_dir: None,
        }
    }

    /// Full argument list for a server bound to `port`.
    pub fn command_args(&self, port: u16) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(flag) = &self.port_arg {
            args.push(flag.clone());
            args.push(port.to_string());
        }
        args
    }
}

/// Asks the OS for a port that is free right now.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Handle on the server under test
///
/// When dropped, a spawned server is killed. An attached server is left alone.
pub struct ServerHandle {
    base_url: String,
    child: Option<Child>,
    log_tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Attaches to or spawns the server, then waits for it to become healthy.
    pub async fn start(
        mode: &ServerMode,
        environment: &TestEnvironment,
        health_path: &str,
        startup_timeout: Duration,
    ) -> Result<Self> {
        let mut handle = match mode {
            ServerMode::Attach { base_url } => {
                info!("Attaching to server at {}", base_url);
                Self {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    child: None,
                    log_tasks: Vec::new(),
                }
            }
            ServerMode::Spawn(spawn) => Self::spawn(spawn, environment)?,
        };

        handle
            .wait_until_healthy(health_path, startup_timeout)
            .await?;
        info!("Server running on {}", handle.base_url);
        Ok(handle)
    }

    fn spawn(config: &SpawnConfig, environment: &TestEnvironment) -> Result<Self> {
        let port = if config.port == 0 {
            free_port()?
        } else {
            config.port
        };
        let base_url = format!("http://{}:{}", config.host, port);
        let args = config.command_args(port);

        info!("Starting {} {}", config.program.display(), args.join(" "));
        let mut command = Command::new(&config.program);
        command
            .args(&args)
            .envs(environment.vars())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            HarnessError::Server(format!(
                "failed to start {}: {}",
                config.program.display(),
                e
            ))
        })?;

        // Stream server output so failures can be diagnosed from the test log.
        let mut log_tasks = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            log_tasks.push(tokio::spawn(forward_lines(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            log_tasks.push(tokio::spawn(forward_lines(stderr)));
        }

        Ok(Self {
            base_url,
            child: Some(child),
            log_tasks,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_spawned(&self) -> bool {
        self.child.is_some()
    }

    async fn wait_until_healthy(&mut self, health_path: &str, timeout: Duration) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.base_url,
            health_path.trim_start_matches('/')
        );
        let client = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()?;

        let start = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(HarnessError::Server(format!(
                        "server exited before becoming healthy: {}",
                        status
                    )));
                }
            }

            match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("Health check returned {}", response.status()),
                Err(e) => debug!("Health check failed: {}", e),
            }

            if start.elapsed() > timeout {
                return Err(HarnessError::Server(format!(
                    "Server did not become healthy within {}s ({})",
                    timeout.as_secs(),
                    url
                )));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// Stops a spawned server and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            info!("Stopping server at {}", self.base_url);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill server process: {}", e);
            }
        }
        for task in self.log_tasks.drain(..) {
            let _ = task.await;
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Waits for `base_url` + `health_path` to answer with a success status.
pub async fn wait_for_health(base_url: &str, health_path: &str, timeout: Duration) -> Result<()> {
    let mut handle = ServerHandle {
        base_url: base_url.trim_end_matches('/').to_string(),
        child: None,
        log_tasks: Vec::new(),
    };
    handle.wait_until_healthy(health_path, timeout).await
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "server", "[server] {}", line);
    }
}
