//! Error types for the CLI

use server::ServerError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// The server failed to start or its run failed
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The tracing subscriber could not be installed
    #[error("cannot initialise diagnostics: {0}")]
    Tracing(String),
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Server(e) => e.exit_code(),
            CliError::Tracing(_) => 1,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
