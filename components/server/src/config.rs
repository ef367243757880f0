//! Server configuration

use async_runtime::LoopConfig;
use std::path::PathBuf;

/// Environment variable overriding the log output directory.
pub const LOG_DIR_VAR: &str = "CORTEN_LOG_DIR";

/// Environment variable enabling file logging (`1`, `true`, `yes`, `on`).
pub const LOGGING_VAR: &str = "CORTEN_LOGGING";

/// Construction parameters for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Whether per-category file logging is on
    pub logging_enabled: bool,
    /// Log output directory; the working directory when unset or invalid
    pub log_dir: Option<PathBuf>,
    /// Directory user files are resolved against
    pub work_dir: PathBuf,
    /// Keep the loop alive until [`ServerCloser::close`](crate::ServerCloser::close)
    pub embedded: bool,
    /// Distinguishes servers sharing a process
    pub instance_number: u32,
    /// Size of the loop's blocking-work pool
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            logging_enabled: false,
            log_dir: None,
            work_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            embedded: false,
            instance_number: 0,
            worker_threads: 4,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CORTEN_LOG_DIR` and `CORTEN_LOGGING`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by variables resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(LOG_DIR_VAR).filter(|dir| !dir.is_empty()) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup(LOGGING_VAR) {
            config.logging_enabled = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        config
    }

    /// Enables or disables embedded mode.
    pub fn with_embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }

    /// Sets the working directory.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Loop parameters derived from this configuration.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            work_dir: self.work_dir.clone(),
            instance_number: self.instance_number,
            worker_threads: self.worker_threads,
        }
    }
}
