//! Dispatch of native completions into script callbacks.
//!
//! Every completion, whatever its category, goes through
//! [`DispatchAdapter::dispatch`]:
//! 1. The registered callback runs on the loop thread.
//! 2. Events the callback queued are drained before control returns, so a
//!    chained operation observes them in the same turn. Poll and process
//!    exit/close categories skip this step (see
//!    [`CallbackKind::drains_queued_events`]).
//! 3. A callback error is handed to the single [`ExceptionHandler`]. If the
//!    handler recovers it, dispatch carries on with later completions. If it
//!    declines, the error is recorded as fatal and the loop stops after the
//!    current dispatch. Nothing is ever propagated into the native frame.
//!
//! Security errors are never offered to the handler; they are always fatal.

use crate::event_loop::{LoopCore, LoopScope};
use crate::native::{CallbackKind, HandleId, NativeEvent};
use core_types::JsError;

/// A script-level callback registered for a handle or request.
pub type Callback = Box<dyn FnMut(&mut LoopScope<'_>, &NativeEvent) -> Result<(), JsError>>;

/// Decides whether a callback error is recoverable.
///
/// Returning `true` means the error was handled and the loop may keep
/// running; `false` makes it fatal.
pub trait ExceptionHandler {
    /// Handles an error thrown by a callback or queued event.
    fn handle(&mut self, error: &JsError) -> bool;
}

impl<F> ExceptionHandler for F
where
    F: FnMut(&JsError) -> bool,
{
    fn handle(&mut self, error: &JsError) -> bool {
        self(error)
    }
}

/// Default handler: reports the error and declines to recover it.
#[derive(Debug, Default, Clone, Copy)]
pub struct UncaughtExceptionHandler;

impl ExceptionHandler for UncaughtExceptionHandler {
    fn handle(&mut self, error: &JsError) -> bool {
        tracing::error!(%error, "uncaught exception");
        false
    }
}

/// Counters describing what the adapter has done so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Native completions dispatched to callbacks
    pub dispatched: u64,
    /// Queued events run by drains
    pub drained: u64,
    /// Errors thrown by callbacks or queued events
    pub failures: u64,
    /// Errors the handler recovered
    pub recovered: u64,
}

/// Marshals native completions into the loop thread's execution context.
pub struct DispatchAdapter {
    handler: Box<dyn ExceptionHandler>,
    fatal: Option<JsError>,
    stats: DispatchStats,
}

impl DispatchAdapter {
    /// Creates an adapter using [`UncaughtExceptionHandler`].
    pub fn new() -> Self {
        Self::with_handler(UncaughtExceptionHandler)
    }

    /// Creates an adapter with a custom exception handler.
    pub fn with_handler(handler: impl ExceptionHandler + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            fatal: None,
            stats: DispatchStats::default(),
        }
    }

    /// Replaces the exception handler.
    pub fn set_handler(&mut self, handler: impl ExceptionHandler + 'static) {
        self.handler = Box::new(handler);
    }

    /// Invokes `callback` for `event`, drains queued events when the category
    /// calls for it, and routes any error to the exception handler.
    pub(crate) fn dispatch(
        &mut self,
        core: &mut LoopCore,
        handle: HandleId,
        callback: &mut Callback,
        event: &NativeEvent,
    ) {
        let kind = event.kind();
        self.stats.dispatched += 1;

        let result = {
            let mut scope = LoopScope::new(core);
            callback(&mut scope, event)
        };
        if let Err(error) = result {
            tracing::debug!(%handle, ?kind, %error, "callback threw");
            self.forward(error);
        }

        if kind.drains_queued_events() {
            self.drain(core);
        }
    }

    /// Runs queued events in enqueue order until the queue is empty,
    /// including events queued by the events being drained. Stops early once
    /// an error has been declared fatal.
    pub(crate) fn drain(&mut self, core: &mut LoopCore) {
        while self.fatal.is_none() {
            let Some(event) = core.dequeue() else {
                break;
            };
            self.stats.drained += 1;
            let result = {
                let mut scope = LoopScope::new(core);
                event.run(&mut scope)
            };
            if let Err(error) = result {
                tracing::debug!(%error, "queued event threw");
                self.forward(error);
            }
        }
    }

    /// Offers `error` to the handler once. Security errors are never
    /// recoverable.
    pub fn consult(&mut self, error: &JsError) -> bool {
        self.stats.failures += 1;
        let recovered = !error.is_security_error() && self.handler.handle(error);
        if recovered {
            self.stats.recovered += 1;
        }
        recovered
    }

    /// Consults the handler and records the error as fatal if it declines.
    /// The first fatal error wins.
    pub(crate) fn forward(&mut self, error: JsError) {
        if !self.consult(&error) && self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    /// Whether a fatal error is pending.
    pub fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// Takes the pending fatal error, if any.
    pub fn take_fatal(&mut self) -> Option<JsError> {
        self.fatal.take()
    }

    /// Dispatch counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

impl Default for DispatchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchAdapter")
            .field("fatal", &self.fatal)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Categories whose callbacks are followed by a queued-event drain.
pub fn draining_kinds() -> impl Iterator<Item = CallbackKind> {
    ALL_KINDS
        .iter()
        .copied()
        .filter(|kind| kind.drains_queued_events())
}

const ALL_KINDS: [CallbackKind; 29] = [
    CallbackKind::StreamRead,
    CallbackKind::StreamRead2,
    CallbackKind::StreamWrite,
    CallbackKind::StreamConnect,
    CallbackKind::StreamConnection,
    CallbackKind::StreamShutdown,
    CallbackKind::StreamClose,
    CallbackKind::File,
    CallbackKind::FileOpen,
    CallbackKind::FileRead,
    CallbackKind::FileWrite,
    CallbackKind::FileStat,
    CallbackKind::FileReadDir,
    CallbackKind::FileReadLink,
    CallbackKind::FileUtime,
    CallbackKind::FileClose,
    CallbackKind::FileEvent,
    CallbackKind::FilePoll,
    CallbackKind::FilePollStop,
    CallbackKind::ProcessExit,
    CallbackKind::ProcessClose,
    CallbackKind::Timer,
    CallbackKind::Signal,
    CallbackKind::UdpRecv,
    CallbackKind::UdpSend,
    CallbackKind::UdpClose,
    CallbackKind::Idle,
    CallbackKind::Check,
    CallbackKind::Async,
];
