//! Runs one server for the binary.
//!
//! The runtime wires the [`ArithmeticEngine`] and a [`StaticLoader`] carrying
//! this crate's version into a [`Server`], runs it with the captured argument
//! vector and reports the exit status.

use crate::engine::ArithmeticEngine;
use crate::error::CliResult;
use server::{ReplInput, Server, ServerConfig, StaticLoader, SystemScript};
use std::io::{self, Write};
use std::sync::Arc;

/// Bootstrap source for the reference engine.
const BOOTSTRAP: &str = "// corten-node bootstrap";

/// Finalization source for the reference engine.
const FINALIZE: &str = "// corten-node finalize";

/// Builder for a single CLI run.
pub struct Runtime {
    config: ServerConfig,
    version: String,
    engine_output: Box<dyn Write>,
    server_output: Box<dyn Write>,
    repl_input: ReplInput,
}

impl Runtime {
    /// Create a runtime with `config`, writing to stdout.
    ///
    /// # Example
    /// ```no_run
    /// use js_cli::Runtime;
    /// use server::ServerConfig;
    ///
    /// let status = Runtime::new(ServerConfig::from_env()).run(&["-p", "6*7"]).unwrap();
    /// assert_eq!(status, 0);
    /// ```
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine_output: Box::new(io::stdout()),
            server_output: Box::new(io::stdout()),
            repl_input: ReplInput::Terminal,
        }
    }

    /// Sends script `print` output and server output to one sink.
    pub fn with_output<W: Write + Clone + 'static>(mut self, output: W) -> Self {
        self.engine_output = Box::new(output.clone());
        self.server_output = Box::new(output);
        self
    }

    /// Reads REPL lines from `input` instead of the terminal.
    pub fn with_repl_input(mut self, input: ReplInput) -> Self {
        self.repl_input = input;
        self
    }

    /// Runs the server to completion and returns the process exit status.
    pub fn run<S: AsRef<str>>(self, args: &[S]) -> CliResult<i32> {
        let engine = ArithmeticEngine::new().with_output(self.engine_output);
        let loader = StaticLoader::new(self.version)
            .with_script(SystemScript::Bootstrap, BOOTSTRAP)
            .with_script(SystemScript::Finalize, FINALIZE);

        let mut server = Server::builder(Box::new(engine), Arc::new(loader))
            .with_config(self.config)
            .with_output(self.server_output)
            .with_repl_input(self.repl_input)
            .build()?;
        tracing::debug!(version = server.version(), "corten-node starting");

        server.run(args)?;
        Ok(server.exit_code())
    }
}
