//! The shared log queue and its writer thread.

use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Identifies one logger: its category and its per-category instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoggerId {
    /// Logger category
    pub category: String,
    /// Instance id within the category, starting at 0
    pub instance: u32,
}

impl LoggerId {
    /// File name used for this logger's output.
    pub fn file_name(&self) -> String {
        format!("{}-{}.log", self.category, self.instance)
    }
}

impl fmt::Display for LoggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.category, self.instance)
    }
}

/// What was logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// A plain message
    Message(String),
    /// A rendered error
    Error(String),
}

/// A single log record.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// The producing logger
    pub logger: LoggerId,
    /// The record content
    pub payload: LogPayload,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    pub fn new(logger: LoggerId, payload: LogPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            logger,
            payload,
        }
    }

    /// The line written to the log file, without the trailing newline.
    pub fn render(&self) -> String {
        let ts = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        match &self.payload {
            LogPayload::Message(message) => format!("{} {}", ts, message),
            LogPayload::Error(error) => format!("{} error: {}", ts, error),
        }
    }
}

enum QueueMessage {
    Event { file: PathBuf, event: LogEvent },
    Close(PathBuf),
    Flush(Sender<()>),
    Shutdown,
}

/// Multi-producer, single-consumer log queue.
///
/// [`log`](Self::log) never blocks beyond the channel send. The writer thread
/// opens files lazily on the first event for them and appends one line per
/// event.
pub struct LogQueue {
    sender: Sender<QueueMessage>,
    writer: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl LogQueue {
    /// Creates the queue and starts its writer thread.
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        let writer = match thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || write_loop(receiver))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "failed to start log writer, log events will be dropped");
                None
            }
        };
        Self {
            sender,
            writer: Mutex::new(writer),
            stopped: AtomicBool::new(false),
        }
    }

    /// Enqueues `event` for appending to `file`.
    pub fn log(&self, file: PathBuf, event: LogEvent) {
        let _ = self.sender.send(QueueMessage::Event { file, event });
    }

    /// Flushes and closes `file` once all earlier events are written.
    pub fn close(&self, file: PathBuf) {
        let _ = self.sender.send(QueueMessage::Close(file));
    }

    /// Blocks until every event enqueued before this call is written.
    pub fn flush(&self) {
        let (ack, done) = channel::bounded(1);
        if self.sender.send(QueueMessage::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Drains the queue and stops the writer. Later events are dropped.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.send(QueueMessage::Shutdown);
        if let Some(writer) = self.writer.lock().take() {
            if writer.thread().id() != thread::current().id() {
                let _ = writer.join();
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for LogQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogQueue")
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}

fn write_loop(receiver: Receiver<QueueMessage>) {
    let mut files: HashMap<PathBuf, BufWriter<File>> = HashMap::new();
    while let Ok(message) = receiver.recv() {
        match message {
            QueueMessage::Event { file, event } => {
                if !files.contains_key(&file) {
                    match OpenOptions::new().create(true).append(true).open(&file) {
                        Ok(f) => {
                            files.insert(file.clone(), BufWriter::new(f));
                        }
                        Err(e) => {
                            tracing::warn!(path = %file.display(), error = %e, "cannot open log file");
                            continue;
                        }
                    }
                }
                if let Some(out) = files.get_mut(&file) {
                    if let Err(e) = writeln!(out, "{}", event.render()) {
                        tracing::warn!(path = %file.display(), error = %e, "log write failed");
                    }
                }
            }
            QueueMessage::Close(file) => {
                if let Some(mut out) = files.remove(&file) {
                    let _ = out.flush();
                }
            }
            QueueMessage::Flush(ack) => {
                for out in files.values_mut() {
                    let _ = out.flush();
                }
                let _ = ack.send(());
            }
            QueueMessage::Shutdown => break,
        }
    }
    for out in files.values_mut() {
        let _ = out.flush();
    }
}
