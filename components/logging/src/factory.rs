//! Logger factory.

use crate::logger::{FileLogger, Logger, NullLogger};
use crate::queue::{LogQueue, LoggerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Category of the logger returned by [`Logging::default_logger`].
pub const DEFAULT_CATEGORY: &str = "corten-node";

/// Hands out loggers that share one [`LogQueue`].
///
/// Each logger of a category gets the next instance id for that category,
/// starting at 0, so concurrently created loggers never share a file.
pub struct Logging {
    next_id: Mutex<HashMap<String, Arc<AtomicU32>>>,
    queue: Arc<LogQueue>,
    shared_queue: bool,
    log_dir: PathBuf,
    enabled: AtomicBool,
    default_logger: Arc<dyn Logger>,
}

impl Logging {
    /// Logs into the current working directory with a private queue.
    pub fn new(enabled: bool) -> Self {
        Self::with_dir(None, enabled)
    }

    /// Logs into `dir` with a private queue. A missing or invalid directory
    /// falls back to the current working directory.
    pub fn with_dir(dir: Option<PathBuf>, enabled: bool) -> Self {
        Self::with_queue(Arc::new(LogQueue::new()), false, dir, enabled)
    }

    /// Logs through `queue`. When `shared` is true the queue belongs to
    /// someone else and [`shutdown`](Self::shutdown) leaves it running.
    pub fn with_queue(
        queue: Arc<LogQueue>,
        shared: bool,
        dir: Option<PathBuf>,
        enabled: bool,
    ) -> Self {
        let log_dir = resolve_dir(dir);
        let mut logging = Self {
            next_id: Mutex::new(HashMap::new()),
            queue,
            shared_queue: shared,
            log_dir,
            enabled: AtomicBool::new(enabled),
            default_logger: Arc::new(NullLogger),
        };
        if enabled {
            logging.default_logger = logging.create(DEFAULT_CATEGORY);
        }
        logging
    }

    /// Returns a logger for `category`, or a no-op logger while disabled.
    pub fn get(&self, category: &str) -> Arc<dyn Logger> {
        if self.is_enabled() {
            self.create(category)
        } else {
            Arc::new(NullLogger)
        }
    }

    /// The logger created at construction. No-op if logging started disabled.
    pub fn default_logger(&self) -> Arc<dyn Logger> {
        self.default_logger.clone()
    }

    /// Sets the global flag and returns its previous value. Affects loggers
    /// handed out afterwards.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    /// Whether new loggers write to files.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Directory log files are written to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// The queue behind every logger of this instance.
    pub fn queue(&self) -> &Arc<LogQueue> {
        &self.queue
    }

    /// Whether the queue is owned elsewhere.
    pub fn is_shared_queue(&self) -> bool {
        self.shared_queue
    }

    /// Drains and stops the queue unless it is shared.
    pub fn shutdown(&self) {
        if !self.shared_queue {
            self.queue.shutdown();
        }
    }

    fn create(&self, category: &str) -> Arc<dyn Logger> {
        let counter = self
            .next_id
            .lock()
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone();
        let id = LoggerId {
            category: category.to_string(),
            instance: counter.fetch_add(1, Ordering::SeqCst),
        };
        Arc::new(FileLogger::new(id, self.log_dir.clone(), self.queue.clone()))
    }
}

impl std::fmt::Debug for Logging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logging")
            .field("log_dir", &self.log_dir)
            .field("enabled", &self.is_enabled())
            .field("shared_queue", &self.shared_queue)
            .finish()
    }
}

fn resolve_dir(dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &dir {
        if dir.is_dir() {
            return dir.clone();
        }
    }
    let fallback = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(dir) = dir {
        tracing::warn!(
            requested = %dir.display(),
            fallback = %fallback.display(),
            "invalid log directory specified"
        );
    }
    fallback
}
