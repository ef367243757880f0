//! Logger interface and its two implementations.

use crate::queue::{LogEvent, LogPayload, LogQueue, LoggerId};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A category logger.
///
/// Implementations must be cheap to call from any thread: logging only
/// enqueues, the file write happens on the queue's writer thread.
pub trait Logger: Send + Sync {
    /// Logs a message.
    fn log(&self, message: &str);

    /// Logs formatted arguments, e.g. `logger.log_fmt(format_args!("{}", x))`.
    fn log_fmt(&self, args: fmt::Arguments<'_>) {
        if self.enabled() {
            self.log(&args.to_string());
        }
    }

    /// Logs an error.
    fn log_error(&self, error: &dyn std::error::Error);

    /// Enables the logger. Returns the previous state.
    fn enable(&self) -> bool;

    /// Disables the logger. Returns the previous state.
    fn disable(&self) -> bool;

    /// Whether events are currently recorded.
    fn enabled(&self) -> bool;

    /// Closes the logger's file. Later events are dropped.
    fn close(&self);
}

/// Logger used while logging is disabled. Every operation is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _message: &str) {}

    fn log_error(&self, _error: &dyn std::error::Error) {}

    fn enable(&self) -> bool {
        false
    }

    fn disable(&self) -> bool {
        false
    }

    fn enabled(&self) -> bool {
        false
    }

    fn close(&self) {}
}

/// Logger writing to `{dir}/{category}-{instance}.log` through a shared
/// [`LogQueue`].
pub struct FileLogger {
    id: LoggerId,
    path: PathBuf,
    queue: Arc<LogQueue>,
    enabled: AtomicBool,
    closed: AtomicBool,
}

impl FileLogger {
    pub(crate) fn new(id: LoggerId, dir: PathBuf, queue: Arc<LogQueue>) -> Self {
        let path = dir.join(id.file_name());
        Self {
            id,
            path,
            queue,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Category and instance id of this logger.
    pub fn id(&self) -> &LoggerId {
        &self.id
    }

    /// File this logger writes to.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn submit(&self, payload: LogPayload) {
        if self.enabled() {
            self.queue
                .log(self.path.clone(), LogEvent::new(self.id.clone(), payload));
        }
    }
}

impl Logger for FileLogger {
    fn log(&self, message: &str) {
        self.submit(LogPayload::Message(message.to_string()));
    }

    fn log_error(&self, error: &dyn std::error::Error) {
        self.submit(LogPayload::Error(error.to_string()));
    }

    fn enable(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.enabled.swap(true, Ordering::SeqCst)
    }

    fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::SeqCst)
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.queue.close(self.path.clone());
        }
    }
}

impl fmt::Debug for FileLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLogger")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("enabled", &self.enabled())
            .finish()
    }
}
