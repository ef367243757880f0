//! Server lifecycle for the Corten runtime.
//!
//! A [`Server`] turns a command line into one run of the loop:
//! 1. arguments are interpreted ([`parse_args`]); version and help requests
//!    print and return without touching the loop
//! 2. the bootstrap script runs once
//! 3. the loop runs the workload: a user file, an eval string or the REPL
//! 4. the finalization script runs once, however the run ended
//!
//! Scripts see server state only through the [`CapabilityHandle`] bound into
//! the engine, and other threads stop a server only through a
//! [`ServerCloser`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod args;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod orchestrator;
pub mod repl;
pub mod system_script;

pub use args::{parse_args, Directive, Dump, Flags, ParsedArgs, RunMode, ServerState, HELP};
pub use capability::{
    Capability, CapabilityHandle, Grants, NativeModule, Principal, SecurityPolicy,
};
pub use config::ServerConfig;
pub use engine::{ScriptEngine, ScriptSource, HOLDER_BINDING};
pub use error::{CapabilityError, ServerError, UsageError};
pub use lifecycle::{LifecycleEvent, LifecycleListener, LifecyclePhase};
pub use loader::{Loader, StaticLoader, LOOP_VERSION_PROPERTY, VERSION_PROPERTY};
pub use orchestrator::{Server, ServerBuilder, ServerCloser, EVAL_SOURCE, REPL_SOURCE};
pub use repl::ReplInput;
pub use system_script::SystemScript;
