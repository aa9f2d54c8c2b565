use thiserror::Error;

/// An environment variable carried a value that could not be used.
///
/// Never fatal: the settings loader logs it and falls back to the default.
#[derive(Debug, Error)]
#[error("{var} value {value:?} is invalid: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// An outbound request failed before a response arrived.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Failure reported by a [`Transport`](crate::traffic::Transport) that does
    /// not go through `reqwest`.
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("lifetime value {value:?} is invalid: {source}")]
pub struct LifetimeError {
    pub value: String,
    #[source]
    pub source: humantime::DurationError,
}

/// Errors that stop the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("echo server failed: {0}")]
    Server(#[from] std::io::Error),
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(std::io::Error),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
