//! Core script value and error types.
//!
//! This crate provides the types shared by every runtime component: the
//! primitive [`Value`] carried between the script engine and the runtime, and
//! the [`JsError`] a script callback throws.
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, JsError, Value};
//!
//! let num = Value::Smi(42);
//! assert_eq!(num.to_string(), "42");
//!
//! let error = JsError::new(ErrorKind::TypeError, "undefined is not a function");
//! assert_eq!(error.kind, ErrorKind::TypeError);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod value;

pub use error::{ErrorKind, JsError};
pub use value::Value;
