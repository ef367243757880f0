//! Build metadata and system script sources.

use crate::system_script::SystemScript;
use std::collections::HashMap;

/// Build property holding the server version.
pub const VERSION_PROPERTY: &str = "corten-node.version";

/// Build property naming the loop version the build is compatible with.
pub const LOOP_VERSION_PROPERTY: &str = "corten-node.loop-version";

/// Supplies build properties and system script sources.
pub trait Loader: Send + Sync {
    /// Looks up a build property.
    fn build_property(&self, name: &str) -> Option<String>;

    /// Source of a system script.
    fn system_script(&self, script: SystemScript) -> Option<String>;
}

/// A loader backed by in-memory tables.
///
/// Starts out compatible with the linked loop and with empty system scripts.
#[derive(Debug, Clone)]
pub struct StaticLoader {
    properties: HashMap<String, String>,
    scripts: HashMap<SystemScript, String>,
}

impl StaticLoader {
    /// Creates a loader reporting `version`.
    pub fn new(version: impl Into<String>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(VERSION_PROPERTY.to_string(), version.into());
        properties.insert(
            LOOP_VERSION_PROPERTY.to_string(),
            async_runtime::LOOP_VERSION.to_string(),
        );
        let scripts = [SystemScript::Bootstrap, SystemScript::Finalize]
            .into_iter()
            .map(|script| (script, String::new()))
            .collect();
        Self { properties, scripts }
    }

    /// Sets a build property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Removes a build property.
    pub fn without_property(mut self, name: &str) -> Self {
        self.properties.remove(name);
        self
    }

    /// Sets the source of a system script.
    pub fn with_script(mut self, script: SystemScript, source: impl Into<String>) -> Self {
        self.scripts.insert(script, source.into());
        self
    }
}

impl Loader for StaticLoader {
    fn build_property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }

    fn system_script(&self, script: SystemScript) -> Option<String> {
        self.scripts.get(&script).cloned()
    }
}
