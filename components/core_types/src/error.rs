//! Script error types.
//!
//! A [`JsError`] is what a script callback "throws". Besides the kind and
//! message it carries the errors that were suppressed while the runtime was
//! unwinding from it, so a failing finalization never hides the original
//! failure.

use std::fmt;

/// The kind of script error.
///
/// These correspond to the script language's built-in error constructors,
/// plus [`ErrorKind::SecurityError`] for capability violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// Syntax error in script code
    SyntaxError,
    /// Type error (e.g., calling a non-function)
    TypeError,
    /// Reference to an undefined variable
    ReferenceError,
    /// Value out of allowed range
    RangeError,
    /// Access to a guarded capability was denied
    SecurityError,
    /// Internal engine or runtime error
    InternalError,
}

impl ErrorKind {
    /// The constructor name shown in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::SecurityError => "SecurityError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

/// A script error with message and suppressed causes.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, JsError};
///
/// let mut error = JsError::new(ErrorKind::TypeError, "undefined is not a function");
/// error.add_suppressed(JsError::error("cleanup failed"));
///
/// assert_eq!(error.message, "undefined is not a function");
/// assert_eq!(error.suppressed.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JsError {
    /// The type of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Errors raised while handling this one, in the order they occurred
    pub suppressed: Vec<JsError>,
}

impl JsError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    /// Creates a plain `Error`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    /// Creates a `SecurityError`.
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityError, message)
    }

    /// Creates an `InternalError`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Attaches an error raised while this one was in flight.
    pub fn add_suppressed(&mut self, error: JsError) {
        self.suppressed.push(error);
    }

    /// Returns true if this error is a capability violation.
    pub fn is_security_error(&self) -> bool {
        self.kind == ErrorKind::SecurityError
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)?;
        for suppressed in &self.suppressed {
            write!(f, "\n    Suppressed: {}", suppressed)?;
        }
        Ok(())
    }
}

impl std::error::Error for JsError {}
