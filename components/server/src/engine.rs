//! The script engine seam.

use crate::capability::{CapabilityHandle, Principal};
use async_runtime::LoopScope;
use core_types::{JsError, Value};
use std::sync::Arc;

/// Global name under which the capability handle is bound.
pub const HOLDER_BINDING: &str = "__corten";

/// Named script source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    /// File name or pseudo name such as `[eval]`
    pub name: String,
    /// Source text
    pub code: String,
}

impl ScriptSource {
    /// Creates a source.
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// A single-threaded script engine.
///
/// Lives on the loop thread. Scripts register native work through the
/// [`LoopScope`] they are evaluated with.
pub trait ScriptEngine {
    /// Binds a host object under a global name. Called once per server,
    /// before the bootstrap script runs. Scripts call into `holder` as
    /// `principal`; they have no other way to obtain an identity the
    /// policy recognizes.
    fn bind(&mut self, name: &str, holder: Arc<CapabilityHandle>, principal: Principal);

    /// Compiles and runs `source`, returning its completion value.
    fn evaluate(&mut self, source: &ScriptSource, scope: &mut LoopScope<'_>) -> Result<Value, JsError>;
}
