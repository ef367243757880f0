//! Bootstrap and finalization scripts.

use crate::engine::{ScriptEngine, ScriptSource};
use crate::lifecycle::{Lifecycle, LifecyclePhase};
use crate::loader::Loader;
use async_runtime::LoopScope;
use core_types::{JsError, Value};
use logging::Logger;
use std::cell::RefCell;
use std::sync::Arc;

/// The two fixed scripts bracketing the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemScript {
    /// Environment setup, runs once before the loop
    Bootstrap,
    /// Teardown and exit notification, runs once after the loop
    Finalize,
}

impl SystemScript {
    /// Script identifier, also used as the source name.
    pub fn id(&self) -> &'static str {
        match self {
            SystemScript::Bootstrap => "corten-node/bootstrap.js",
            SystemScript::Finalize => "corten-node/finalize.js",
        }
    }
}

/// Loop-thread access to the engine, shared by the orchestrator and the
/// callbacks it registers.
pub(crate) struct ScriptHost {
    engine: RefCell<Box<dyn ScriptEngine>>,
    loader: Arc<dyn Loader>,
    log: Arc<dyn Logger>,
    lifecycle: Arc<Lifecycle>,
}

impl ScriptHost {
    pub(crate) fn new(
        engine: Box<dyn ScriptEngine>,
        loader: Arc<dyn Loader>,
        log: Arc<dyn Logger>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            engine: RefCell::new(engine),
            loader,
            log,
            lifecycle,
        }
    }

    /// Evaluates user code. Fails instead of re-entering a busy engine.
    pub(crate) fn evaluate(&self, source: &ScriptSource, scope: &mut LoopScope<'_>) -> Result<Value, JsError> {
        let mut engine = self
            .engine
            .try_borrow_mut()
            .map_err(|_| JsError::internal("script engine re-entered"))?;
        engine.evaluate(source, scope)
    }

    /// Runs one system script.
    pub(crate) fn run(&self, script: SystemScript, scope: &mut LoopScope<'_>) -> Result<(), JsError> {
        let code = self
            .loader
            .system_script(script)
            .ok_or_else(|| JsError::internal(format!("system script {} not found", script.id())))?;
        self.log.log(&format!("loading system script {}", script.id()));
        tracing::debug!(script = script.id(), "running system script");
        self.evaluate(&ScriptSource::new(script.id(), code), scope)
            .map(|_| ())
    }

    /// Runs the finalization script unless some earlier trigger already did.
    pub(crate) fn finalize_once(&self, scope: &mut LoopScope<'_>) -> Result<(), JsError> {
        if !self.lifecycle.mark_finalized() {
            return Ok(());
        }
        self.lifecycle.advance(LifecyclePhase::Finalizing);
        self.run(SystemScript::Finalize, scope)
    }
}
