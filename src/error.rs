use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors produced by the harness.
///
/// The variants keep assertion failures, fatal fixture failures and transport
/// failures apart so a test report tells them apart as well.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// An expectation about a response did not hold. Fails the current test only.
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// A session-wide fixture could not establish the baseline state.
    /// Every test depending on it fails with the same error.
    #[error("Fixture setup failed: {0}")]
    Setup(String),

    /// Connection refused, timeout, or any other failure below HTTP.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body was valid but did not have the expected shape.
    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Spawning the server or waiting for it to become healthy failed.
    #[error("Server lifecycle error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error invalidates the whole test session rather than a single test.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::Setup(_) | HarnessError::Server(_))
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::Assertion(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, HarnessError::Transport(_))
    }
}
