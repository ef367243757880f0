//! Error types for the server

use crate::capability::Capability;
use core_types::{ErrorKind, JsError};
use thiserror::Error;

/// Bad command line. Reported before any script runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// A runtime flag nobody recognises
    #[error("unrecognized flag {0}\nTry --help for options")]
    UnrecognizedFlag(String),

    /// `-e`, `--eval` or `-pe` at the end of the command line
    #[error("arg '{0}' requires an argument")]
    MissingArgument(String),
}

/// Failures of [`CapabilityHandle`](crate::CapabilityHandle) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The caller lacks the capability the operation requires
    #[error("access denied: {principal} lacks {capability}")]
    AccessDenied {
        /// Name of the calling principal
        principal: String,
        /// The required capability
        capability: Capability,
    },

    /// `install_native_module` was called a second time
    #[error("native module already installed")]
    ModuleAlreadyInstalled,

    /// `require` was called before a native module was installed
    #[error("no native module installed")]
    NoNativeModule,
}

impl From<CapabilityError> for JsError {
    fn from(err: CapabilityError) -> Self {
        let kind = match err {
            CapabilityError::AccessDenied { .. } => ErrorKind::SecurityError,
            _ => ErrorKind::Error,
        };
        JsError::new(kind, err.to_string())
    }
}

/// Errors returned by [`Server`](crate::Server) construction and
/// [`Server::run`](crate::Server::run).
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad command line
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The bootstrap script threw and the handler declined to recover
    #[error("bootstrap failed: {0}")]
    Bootstrap(JsError),

    /// A loop callback threw and the handler declined to recover
    #[error("uncaught exception: {0}")]
    Loop(JsError),

    /// The finalization script threw after an otherwise clean run
    #[error("finalization failed: {0}")]
    Finalize(JsError),

    /// Capability check failed for the embedding host
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The loader expects a different loop than the one linked in
    #[error("loop version mismatch: expected '{expected}', found '{found}'")]
    VersionMismatch {
        /// Version named by the loader
        expected: String,
        /// Version of the linked loop
        found: String,
    },

    /// The loader does not publish a required build property
    #[error("missing build property '{0}'")]
    MissingBuildProperty(String),

    /// `run` was called on a server that already ran
    #[error("server already started")]
    AlreadyStarted,

    /// Writing version or help output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// The script error behind this failure, if any.
    pub fn script_error(&self) -> Option<&JsError> {
        match self {
            ServerError::Bootstrap(e) | ServerError::Loop(e) | ServerError::Finalize(e) => Some(e),
            _ => None,
        }
    }
}
