//! The capability handle exposed to scripts.
//!
//! [`CapabilityHandle`] is the only view scripts get of server state. Each
//! operation names the [`Capability`] it requires and is checked through one
//! guard before it touches anything. Argument lists are returned as fresh
//! copies, and the setters are crate-private, so scripts cannot change what
//! the orchestrator decided.

use crate::args::{Flags, RunMode, ServerState};
use crate::error::CapabilityError;
use crate::loader::Loader;
use async_runtime::LoopHandle;
use core_types::{JsError, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// A named permission checked by [`CapabilityHandle`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Access to runtime internals: loop, loader, arguments, exit code,
    /// native module
    Runtime,
    /// Read the process environment
    ReadEnv,
}

impl Capability {
    /// The permission name.
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Runtime => "corten-node",
            Capability::ReadEnv => "corten-node.env",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of code calling into the handle.
///
/// Every [`Principal::new`] mints a distinct identity. Two principals are
/// equal only when one is a clone of the other, so knowing a name grants
/// nothing: callers can present only identities they were handed.
#[derive(Debug, Clone)]
pub struct Principal {
    id: u64,
    name: Arc<str>,
}

static NEXT_PRINCIPAL: AtomicU64 = AtomicU64::new(1);

impl Principal {
    /// Mints a new identity labelled `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_PRINCIPAL.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name.into()),
        }
    }

    /// The label given at creation. Not unique.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Decides which principals hold which capabilities.
pub trait SecurityPolicy: Send + Sync {
    /// Whether `principal` may use `capability`.
    fn permits(&self, principal: &Principal, capability: Capability) -> bool;
}

/// A mutable grant table. Principals without an entry hold nothing.
#[derive(Debug, Default)]
pub struct Grants {
    table: RwLock<HashMap<Principal, HashSet<Capability>>>,
}

impl Grants {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `capability` to `principal`.
    pub fn grant(&self, principal: Principal, capability: Capability) {
        self.table.write().entry(principal).or_default().insert(capability);
    }

    /// Revokes `capability` from `principal`. Takes effect on the next check.
    pub fn revoke(&self, principal: &Principal, capability: Capability) {
        if let Some(held) = self.table.write().get_mut(principal) {
            held.remove(&capability);
        }
    }
}

impl SecurityPolicy for Grants {
    fn permits(&self, principal: &Principal, capability: Capability) -> bool {
        self.table
            .read()
            .get(principal)
            .is_some_and(|held| held.contains(&capability))
    }
}

/// A module object installed by the bootstrap script.
pub trait NativeModule: Send + Sync {
    /// Resolves a native module by name.
    fn require(&self, name: &str) -> Result<Value, JsError>;
}

#[derive(Default)]
struct Args {
    runtime_args: Vec<String>,
    user_args: Vec<String>,
    user_files: Vec<String>,
}

/// Access-checked view of server state handed to the script engine.
///
/// Without a [`SecurityPolicy`] every caller is permitted.
pub struct CapabilityHandle {
    policy: Option<Arc<dyn SecurityPolicy>>,
    context: Principal,
    event_loop: LoopHandle,
    loader: Arc<dyn Loader>,
    state: RwLock<ServerState>,
    args: RwLock<Args>,
    exit_code: AtomicI32,
    native_module: Mutex<Option<Arc<dyn NativeModule>>>,
}

impl CapabilityHandle {
    pub(crate) fn new(
        event_loop: LoopHandle,
        loader: Arc<dyn Loader>,
        policy: Option<Arc<dyn SecurityPolicy>>,
        context: Principal,
    ) -> Self {
        Self {
            policy,
            context,
            event_loop,
            loader,
            state: RwLock::new(ServerState::default()),
            args: RwLock::new(Args::default()),
            exit_code: AtomicI32::new(0),
            native_module: Mutex::new(None),
        }
    }

    /// The single permission check behind every operation.
    pub fn guard(&self, caller: &Principal, capability: Capability) -> Result<(), CapabilityError> {
        match &self.policy {
            Some(policy) if !policy.permits(caller, capability) => {
                tracing::debug!(%caller, %capability, "capability check failed");
                Err(CapabilityError::AccessDenied {
                    principal: caller.name().to_string(),
                    capability,
                })
            }
            _ => Ok(()),
        }
    }

    /// Principal captured when the server was built.
    pub fn control_context(&self, caller: &Principal) -> Result<Principal, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.context.clone())
    }

    /// Handle to the server's loop.
    pub fn event_loop(&self, caller: &Principal) -> Result<LoopHandle, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.event_loop.clone())
    }

    /// The module loader.
    pub fn loader(&self, caller: &Principal) -> Result<Arc<dyn Loader>, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.loader.clone())
    }

    /// Runtime flags of this run.
    pub fn runtime_args(&self, caller: &Principal) -> Result<Vec<String>, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.args.read().runtime_args.clone())
    }

    /// Arguments for the user script.
    pub fn user_args(&self, caller: &Principal) -> Result<Vec<String>, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.args.read().user_args.clone())
    }

    /// User script files; empty in eval and REPL mode.
    pub fn user_files(&self, caller: &Principal) -> Result<Vec<String>, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.args.read().user_files.clone())
    }

    /// Command-line switches.
    pub fn flags(&self, caller: &Principal) -> Result<Flags, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.state.read().flags)
    }

    /// Resolved run mode.
    pub fn run_mode(&self, caller: &Principal) -> Result<RunMode, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.state.read().run_mode)
    }

    /// Source given to `-e`/`-p`.
    pub fn eval_string(&self, caller: &Principal) -> Result<Option<String>, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.state.read().eval_string.clone())
    }

    /// Current process exit code.
    pub fn exit_code(&self, caller: &Principal) -> Result<i32, CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        Ok(self.current_exit_code())
    }

    /// Sets the process exit code, e.g. from `process.exitCode = n`.
    pub fn set_exit_code(&self, caller: &Principal, code: i32) -> Result<(), CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        self.store_exit_code(code);
        Ok(())
    }

    /// Process environment, sorted by name.
    pub fn env(&self, caller: &Principal) -> Result<Vec<(String, String)>, CapabilityError> {
        self.guard(caller, Capability::ReadEnv)?;
        let mut vars: Vec<(String, String)> = std::env::vars().collect();
        vars.sort();
        Ok(vars)
    }

    /// Installs the native module object. Allowed once; later calls fail and
    /// leave the first module in place.
    pub fn install_native_module(
        &self,
        caller: &Principal,
        module: Arc<dyn NativeModule>,
    ) -> Result<(), CapabilityError> {
        self.guard(caller, Capability::Runtime)?;
        let mut slot = self.native_module.lock();
        if slot.is_some() {
            return Err(CapabilityError::ModuleAlreadyInstalled);
        }
        *slot = Some(module);
        Ok(())
    }

    /// Calls `require(name)` on the installed native module.
    pub fn require(&self, caller: &Principal, name: &str) -> Result<Value, JsError> {
        self.guard(caller, Capability::Runtime)?;
        let module = self
            .native_module
            .lock()
            .clone()
            .ok_or(CapabilityError::NoNativeModule)?;
        module.require(name)
    }

    pub(crate) fn set_state(&self, state: ServerState) {
        *self.state.write() = state;
    }

    pub(crate) fn set_args(&self, runtime_args: Vec<String>, user_args: Vec<String>, user_files: Vec<String>) {
        *self.args.write() = Args {
            runtime_args,
            user_args,
            user_files,
        };
    }

    pub(crate) fn current_exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub(crate) fn store_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("context", &self.context)
            .field("policy", &self.policy.is_some())
            .field("exit_code", &self.current_exit_code())
            .finish()
    }
}
