//! The lifecycle orchestrator.
//!
//! [`Server::run`] interprets the command line, runs the bootstrap script,
//! runs the loop with the selected workload and runs the finalization script.
//! Finalization happens exactly once per server whichever way the run ends:
//! a clean finish, an unrecovered error, or a [`ServerCloser::close`] from
//! another thread. An error raised while finalizing after a failure is
//! attached to that failure as suppressed.

use crate::args::{parse_args, Directive, Dump, RunMode, ServerState, HELP};
use crate::capability::{Capability, CapabilityHandle, Principal, SecurityPolicy};
use crate::config::ServerConfig;
use crate::engine::{ScriptEngine, ScriptSource, HOLDER_BINDING};
use crate::error::ServerError;
use crate::lifecycle::{Lifecycle, LifecycleEvent, LifecycleListener, LifecyclePhase};
use crate::loader::{Loader, LOOP_VERSION_PROPERTY, VERSION_PROPERTY};
use crate::repl::{self, ReplInput};
use crate::system_script::{ScriptHost, SystemScript};
use async_runtime::{
    AsyncHandle, EventLoop, ExceptionHandler, HandleId, LoopHandle, LoopScope, NativeEvent,
    LOOP_VERSION,
};
use core_types::JsError;
use logging::{Logger, Logging};
use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Source name of the `-e`/`-p` workload.
pub const EVAL_SOURCE: &str = "[eval]";

/// Source name of REPL inputs.
pub const REPL_SOURCE: &str = "repl";

type Output = Rc<RefCell<Box<dyn Write>>>;

struct Shared {
    lifecycle: Arc<Lifecycle>,
    holder: Arc<CapabilityHandle>,
    keep_alive: Option<AsyncHandle>,
    interrupt: AsyncHandle,
}

/// Requests shutdown of a server from any thread.
///
/// Only the first `close` has an effect. It wakes the loop thread, which
/// closes the keep-alive handle (embedded mode), runs finalization if it has
/// not run yet, and stops the loop.
#[derive(Clone)]
pub struct ServerCloser {
    shared: Arc<Shared>,
}

impl ServerCloser {
    /// Requests shutdown. Returns true for the call that won.
    pub fn close(&self) -> bool {
        if !self.shared.lifecycle.mark_closed() {
            return false;
        }
        tracing::debug!("server close requested");
        if let Some(keep_alive) = &self.shared.keep_alive {
            keep_alive.send();
        }
        self.shared.interrupt.send();
        true
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_closed()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        self.shared.lifecycle.phase()
    }
}

impl std::fmt::Debug for ServerCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCloser")
            .field("phase", &self.phase())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Collects the collaborators and settings of a [`Server`].
pub struct ServerBuilder {
    engine: Box<dyn ScriptEngine>,
    loader: Arc<dyn Loader>,
    config: ServerConfig,
    logging: Option<Arc<Logging>>,
    policy: Option<Arc<dyn SecurityPolicy>>,
    principal: Principal,
    listener: Option<Box<dyn LifecycleListener>>,
    output: Option<Box<dyn Write>>,
    repl_input: ReplInput,
}

impl ServerBuilder {
    /// Uses `config` instead of [`ServerConfig::default`].
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Logs through `logging` instead of a private instance built from the
    /// configuration.
    pub fn with_logging(mut self, logging: Arc<Logging>) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Guards the capability handle with `policy`.
    pub fn with_policy(mut self, policy: Arc<dyn SecurityPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Principal the host and its scripts run as. Defaults to a fresh
    /// principal labelled `system`, minted for this server alone.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Receives `started`/`stopped` notifications.
    pub fn with_listener(mut self, listener: impl LifecycleListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Destination for version, help, print and REPL output. Defaults to
    /// stdout.
    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = Some(output);
        self
    }

    /// Where REPL lines come from.
    pub fn with_repl_input(mut self, input: ReplInput) -> Self {
        self.repl_input = input;
        self
    }

    /// Checks the loader's build properties and creates the server.
    pub fn build(self) -> Result<Server, ServerError> {
        let version = build_property(&*self.loader, VERSION_PROPERTY)?;
        let loop_version = build_property(&*self.loader, LOOP_VERSION_PROPERTY)?;
        if loop_version != LOOP_VERSION {
            return Err(ServerError::VersionMismatch {
                expected: loop_version,
                found: LOOP_VERSION.to_string(),
            });
        }

        let config = self.config;
        let logging = self.logging.unwrap_or_else(|| {
            Arc::new(Logging::with_dir(config.log_dir.clone(), config.logging_enabled))
        });
        let log = logging.default_logger();

        let mut event_loop = EventLoop::new(config.loop_config());
        let lifecycle = Arc::new(Lifecycle::new());
        let holder = Arc::new(CapabilityHandle::new(
            event_loop.handle(),
            self.loader.clone(),
            self.policy,
            self.principal.clone(),
        ));
        let mut engine = self.engine;
        engine.bind(HOLDER_BINDING, holder.clone(), self.principal.clone());
        let host = Rc::new(ScriptHost::new(
            engine,
            self.loader,
            log.clone(),
            lifecycle.clone(),
        ));

        let interrupt = {
            let host = host.clone();
            let mut scope = event_loop.scope();
            let interrupt = scope.new_async(move |scope, _| {
                let finalized = host.finalize_once(scope);
                scope.handle().stop();
                finalized
            });
            scope.unref(interrupt.id());
            interrupt
        };

        // Embedded servers stay up until closed; the wake closes this handle.
        let keep_alive = if config.embedded {
            let own: Rc<Cell<Option<HandleId>>> = Rc::new(Cell::new(None));
            let slot = own.clone();
            let keep_alive = event_loop.scope().new_async(move |scope, _| {
                if let Some(id) = slot.get() {
                    scope.close(id);
                }
                Ok(())
            });
            own.set(Some(keep_alive.id()));
            Some(keep_alive)
        } else {
            None
        };

        tracing::debug!(%version, %loop_version, embedded = config.embedded, "server created");
        Ok(Server {
            event_loop,
            host,
            shared: Arc::new(Shared {
                lifecycle,
                holder,
                keep_alive,
                interrupt,
            }),
            logging,
            log,
            principal: self.principal,
            listener: self.listener,
            output: Rc::new(RefCell::new(
                self.output
                    .unwrap_or_else(|| Box::new(io::stdout()) as Box<dyn Write>),
            )),
            repl_input: self.repl_input,
            repl_reader: None,
            config,
            version,
            loop_version,
        })
    }
}

fn build_property(loader: &dyn Loader, name: &str) -> Result<String, ServerError> {
    loader
        .build_property(name)
        .ok_or_else(|| ServerError::MissingBuildProperty(name.to_string()))
}

/// A server instance. Lives on the thread that calls [`run`](Self::run).
///
/// # Examples
///
/// ```
/// use async_runtime::LoopScope;
/// use core_types::{JsError, Value};
/// use server::{CapabilityHandle, Principal, ScriptEngine, ScriptSource, Server, StaticLoader};
/// use std::sync::Arc;
///
/// struct Silent;
///
/// impl ScriptEngine for Silent {
///     fn bind(&mut self, _name: &str, _holder: Arc<CapabilityHandle>, _principal: Principal) {}
///
///     fn evaluate(&mut self, _source: &ScriptSource, _scope: &mut LoopScope<'_>) -> Result<Value, JsError> {
///         Ok(Value::Undefined)
///     }
/// }
///
/// let mut server = Server::builder(Box::new(Silent), Arc::new(StaticLoader::new("0.1.0")))
///     .build()
///     .unwrap();
/// server.run(&["-e", "1"]).unwrap();
/// assert_eq!(server.exit_code(), 0);
/// ```
pub struct Server {
    event_loop: EventLoop,
    host: Rc<ScriptHost>,
    shared: Arc<Shared>,
    logging: Arc<Logging>,
    log: Arc<dyn Logger>,
    principal: Principal,
    listener: Option<Box<dyn LifecycleListener>>,
    output: Output,
    repl_input: ReplInput,
    repl_reader: Option<JoinHandle<()>>,
    config: ServerConfig,
    version: String,
    loop_version: String,
}

impl Server {
    /// Starts building a server around `engine` and `loader`.
    pub fn builder(engine: Box<dyn ScriptEngine>, loader: Arc<dyn Loader>) -> ServerBuilder {
        ServerBuilder {
            engine,
            loader,
            config: ServerConfig::default(),
            logging: None,
            policy: None,
            principal: Principal::new("system"),
            listener: None,
            output: None,
            repl_input: ReplInput::default(),
        }
    }

    /// Runs the server with the raw argument vector (without the program
    /// name). Returns once the loop has finished and finalization has run.
    pub fn run<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), ServerError> {
        self.shared.holder.guard(&self.principal, Capability::Runtime)?;
        if self.shared.lifecycle.phase() != LifecyclePhase::NotStarted {
            return Err(ServerError::AlreadyStarted);
        }

        let result = self.run_to_completion(args);

        self.event_loop.shutdown();
        self.release_repl_reader();
        self.logging.shutdown();
        self.shared.lifecycle.advance(LifecyclePhase::Stopped);
        self.emit(LifecycleEvent::Stopped);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "server run failed");
        }
        result
    }

    /// The identity handed to the engine at bind time.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Process exit code decided by the run.
    pub fn exit_code(&self) -> i32 {
        self.shared.holder.current_exit_code()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        self.shared.lifecycle.phase()
    }

    /// A thread-safe handle for shutting the server down.
    pub fn closer(&self) -> ServerCloser {
        ServerCloser {
            shared: self.shared.clone(),
        }
    }

    /// Requests shutdown; same as `self.closer().close()`.
    pub fn close(&self) -> bool {
        self.closer().close()
    }

    /// The capability handle bound into the engine.
    pub fn capability(&self) -> Arc<CapabilityHandle> {
        self.shared.holder.clone()
    }

    /// The server-wide logger.
    pub fn logger(&self) -> Arc<dyn Logger> {
        self.log.clone()
    }

    /// Handle to the server's loop.
    pub fn loop_handle(&self) -> LoopHandle {
        self.event_loop.handle()
    }

    /// Server version from the loader.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Loop version the build is compatible with.
    pub fn loop_version(&self) -> &str {
        &self.loop_version
    }

    /// Installs the handler consulted for every script error.
    pub fn set_exception_handler(&mut self, handler: impl ExceptionHandler + 'static) {
        self.event_loop.set_exception_handler(handler);
    }

    fn run_to_completion<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), ServerError> {
        let parsed = parse_args(args);
        self.log
            .log(&format!("runtime args {:?}", parsed.state.runtime_args));
        self.log.log(&format!("user file {:?}", parsed.state.user_file));
        self.log.log(&format!("user args {:?}", parsed.state.user_args));
        self.shared.holder.set_state(parsed.state.clone());

        match parsed.directive? {
            Directive::Dump(dump) => self.dump(dump),
            Directive::Run(mode) => self.run_event_loop(mode, &parsed.state),
        }
    }

    fn dump(&self, dump: Dump) -> Result<(), ServerError> {
        let mut out = self.output.borrow_mut();
        match dump {
            Dump::Version => writeln!(out, "v{}", self.version)?,
            Dump::LoopVersion => writeln!(out, "v{}", self.loop_version)?,
            Dump::Help => writeln!(out, "{}", HELP)?,
        }
        out.flush()?;
        Ok(())
    }

    fn run_event_loop(&mut self, mode: RunMode, state: &ServerState) -> Result<(), ServerError> {
        let (runtime_args, user_args, user_files) = match mode {
            RunMode::Repl => (Vec::new(), Vec::new(), Vec::new()),
            RunMode::Eval => (state.runtime_args.clone(), state.user_args.clone(), Vec::new()),
            RunMode::File => (
                state.runtime_args.clone(),
                state.user_args.clone(),
                state.user_file.iter().cloned().collect(),
            ),
        };
        self.shared.holder.set_args(runtime_args, user_args, user_files);

        self.shared.lifecycle.advance(LifecyclePhase::Bootstrapping);
        let bootstrapped = self
            .host
            .run(SystemScript::Bootstrap, &mut self.event_loop.scope());
        if let Err(error) = bootstrapped {
            if !self.event_loop.handle_callback_exception(&error) {
                return Err(ServerError::Bootstrap(self.finalize_after(error)));
            }
        }

        self.emit(LifecycleEvent::Started);
        self.shared.lifecycle.advance(LifecyclePhase::Running);

        // Errors reaching this point were already declined by the handler.
        let scheduled = match self.schedule(mode, state) {
            Err(error) if self.event_loop.handle_callback_exception(&error) => Ok(()),
            other => other,
        };
        let root = match scheduled.and_then(|()| self.event_loop.run()) {
            Ok(()) => None,
            Err(error) => {
                self.event_loop.stop();
                self.shared.holder.store_exit_code(1);
                Some(error)
            }
        };

        let finalized = self.host.finalize_once(&mut self.event_loop.scope());
        match (root, finalized) {
            (None, Ok(())) => Ok(()),
            (Some(error), Ok(())) => Err(ServerError::Loop(error)),
            (Some(mut error), Err(late)) => {
                error.add_suppressed(late);
                Err(ServerError::Loop(error))
            }
            (None, Err(late)) => {
                if self.event_loop.handle_callback_exception(&late) {
                    Ok(())
                } else {
                    self.shared.holder.store_exit_code(1);
                    Err(ServerError::Finalize(late))
                }
            }
        }
    }

    /// Finalizes after an unrecovered bootstrap error. The original error is
    /// kept; a finalization error the handler declines is suppressed onto it.
    fn finalize_after(&mut self, mut error: JsError) -> JsError {
        self.shared.holder.store_exit_code(1);
        if let Err(late) = self.host.finalize_once(&mut self.event_loop.scope()) {
            if !self.event_loop.handle_callback_exception(&late) {
                error.add_suppressed(late);
            }
        }
        error
    }

    /// Registers the workload of `mode` with the loop.
    fn schedule(&mut self, mode: RunMode, state: &ServerState) -> Result<(), JsError> {
        let host = self.host.clone();
        let output = self.output.clone();
        match mode {
            RunMode::Eval => {
                let code = state.eval_string.clone().unwrap_or_default();
                let print = state.flags.print_eval;
                self.event_loop.scope().enqueue(move |scope| {
                    let value = host.evaluate(&ScriptSource::new(EVAL_SOURCE, code), scope)?;
                    if print {
                        print_value(&output, &value);
                    }
                    Ok(())
                });
            }
            RunMode::File => {
                let Some(file) = state.user_file.clone() else {
                    return Ok(());
                };
                let path = self.config.work_dir.join(&file);
                self.event_loop.scope().submit(
                    move |scope: &mut LoopScope<'_>, event: &NativeEvent| match event {
                        NativeEvent::FileRead {
                            data, error: None, ..
                        } => {
                            let code = String::from_utf8_lossy(data).into_owned();
                            host.evaluate(&ScriptSource::new(file, code), scope).map(|_| ())
                        }
                        NativeEvent::FileRead {
                            error: Some(e), ..
                        } => Err(JsError::error(format!("Cannot find module '{}': {}", file, e))),
                        _ => Ok(()),
                    },
                    move || read_file(&path),
                );
            }
            RunMode::Repl => {
                let stdin = self.event_loop.scope().open(move |scope, event| {
                    if let NativeEvent::StreamRead { data: Some(line) } = event {
                        let code = String::from_utf8_lossy(line).into_owned();
                        match host.evaluate(&ScriptSource::new(REPL_SOURCE, code), scope) {
                            Ok(value) => print_value(&output, &value),
                            Err(error) if error.is_security_error() => return Err(error),
                            Err(error) => print_value(&output, &error),
                        }
                    }
                    Ok(())
                });
                let reader = repl::spawn_reader(self.repl_input.clone(), self.event_loop.handle(), stdin)
                    .map_err(|e| JsError::internal(format!("cannot start repl: {}", e)))?;
                self.repl_reader = Some(reader);
            }
        }
        Ok(())
    }

    /// Joins the REPL reader once the loop is down. A reader still blocked
    /// on the terminal is left to exit with the process; it stops posting
    /// as soon as it sees the stopped loop.
    fn release_repl_reader(&mut self) {
        let Some(reader) = self.repl_reader.take() else {
            return;
        };
        if reader.is_finished() || matches!(self.repl_input, ReplInput::Lines(_)) {
            if reader.join().is_err() {
                tracing::warn!("repl reader panicked");
            }
        } else {
            tracing::debug!("repl reader still waiting for input, detaching");
        }
    }

    /// Best effort: listener failures are logged and otherwise ignored.
    fn emit(&mut self, event: LifecycleEvent) {
        if let Some(listener) = self.listener.as_mut() {
            if let Err(error) = listener.notify(event) {
                tracing::warn!(event = event.name(), %error, "lifecycle listener failed");
                self.log.log_error(&error);
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("version", &self.version)
            .field("phase", &self.phase())
            .field("exit_code", &self.exit_code())
            .field("event_loop", &self.event_loop)
            .finish()
    }
}

fn print_value(output: &Output, value: &dyn std::fmt::Display) {
    let mut out = output.borrow_mut();
    if let Err(e) = writeln!(out, "{}", value).and_then(|()| out.flush()) {
        tracing::warn!(error = %e, "cannot write output");
    }
}

fn read_file(path: &Path) -> NativeEvent {
    match std::fs::read(path) {
        Ok(data) => NativeEvent::FileRead {
            bytes_read: data.len() as i64,
            data,
            error: None,
        },
        Err(e) => NativeEvent::FileRead {
            bytes_read: -1,
            data: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}
