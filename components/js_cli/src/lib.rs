//! Corten node CLI library
//!
//! Provides the command line, the arithmetic reference engine and the glue
//! that runs a [`server::Server`] for the `corten-node` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod engine;
pub mod error;
pub mod runtime;

pub use cli::Cli;
pub use engine::ArithmeticEngine;
pub use error::{CliError, CliResult};
pub use runtime::Runtime;
