//! Asynchronous per-category file logging.
//!
//! All loggers of a [`Logging`] instance feed one [`LogQueue`]. Producers only
//! enqueue; a single background writer performs every file write in order, so
//! loggers never lock around I/O.
//!
//! - [`Logging`] - factory handing out loggers per category
//! - [`Logger`] - the logging interface; [`FileLogger`] and [`NullLogger`]
//! - [`LogQueue`] - the shared multi-producer, single-consumer queue

#![warn(missing_docs)]
#![warn(clippy::all)]

mod factory;
mod logger;
mod queue;

pub use factory::{Logging, DEFAULT_CATEGORY};
pub use logger::{FileLogger, Logger, NullLogger};
pub use queue::{LogEvent, LogPayload, LogQueue, LoggerId};
