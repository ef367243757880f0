//! Native event loop and callback dispatch.
//!
//! This crate provides the loop-thread side of the runtime:
//! - [`EventLoop`] - single-threaded loop owning every script callback
//! - [`LoopHandle`] / [`AsyncHandle`] - thread-safe ways to reach the loop
//! - [`DispatchAdapter`] - routes native completions into callbacks, drains
//!   queued events and isolates callback errors
//! - [`NativeEvent`] - the completion payloads native threads deliver
//!
//! Native threads never run script code. They post a [`Completion`] and the
//! loop thread dispatches it.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{EventLoop, LoopConfig, NativeEvent};
//!
//! let mut event_loop = EventLoop::new(LoopConfig::default());
//! let handle = event_loop.handle();
//! let id = event_loop.scope().request(|_, event| {
//!     assert_eq!(*event, NativeEvent::Signal { signum: 2 });
//!     Ok(())
//! });
//!
//! std::thread::spawn(move || {
//!     handle.post(id, NativeEvent::Signal { signum: 2 });
//! });
//! event_loop.run().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod event_loop;
pub mod native;
pub mod task_queue;
pub mod thread_pool;

// Re-export main types at crate root
pub use dispatch::{
    Callback, DispatchAdapter, DispatchStats, ExceptionHandler, UncaughtExceptionHandler,
};
pub use event_loop::{AsyncHandle, EventLoop, LoopConfig, LoopHandle, LoopScope, LOOP_VERSION};
pub use native::{CallbackKind, Completion, FileStats, HandleId, NativeEvent};
pub use task_queue::{EventQueue, QueuedEvent};
pub use thread_pool::ThreadPool;
