//! Lifecycle phases, one-shot transition flags and listener notifications.

use core_types::JsError;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Where a server is in its life.
///
/// Phases only move forward. `Finalizing` can be entered from any earlier
/// phase; entering it again is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecyclePhase {
    /// Constructed, `run` not called yet
    NotStarted = 0,
    /// Running the bootstrap script
    Bootstrapping = 1,
    /// Running the main loop
    Running = 2,
    /// Running the finalization script
    Finalizing = 3,
    /// Loop stopped and resources released
    Stopped = 4,
}

impl LifecyclePhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecyclePhase::NotStarted,
            1 => LifecyclePhase::Bootstrapping,
            2 => LifecyclePhase::Running,
            3 => LifecyclePhase::Finalizing,
            _ => LifecyclePhase::Stopped,
        }
    }
}

/// Notification sent to a [`LifecycleListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Bootstrap finished, the main loop is about to run
    Started,
    /// The server has shut down
    Stopped,
}

impl LifecycleEvent {
    /// Event name as reported to listeners.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Started => "started",
            LifecycleEvent::Stopped => "stopped",
        }
    }
}

/// Observer of lifecycle events. Failures are logged and otherwise ignored.
pub trait LifecycleListener {
    /// Receives one event.
    fn notify(&mut self, event: LifecycleEvent) -> Result<(), JsError>;
}

impl<F> LifecycleListener for F
where
    F: FnMut(LifecycleEvent) -> Result<(), JsError>,
{
    fn notify(&mut self, event: LifecycleEvent) -> Result<(), JsError> {
        self(event)
    }
}

/// State shared between the loop thread and [`ServerCloser`](crate::ServerCloser)s.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    phase: AtomicU8,
    finalized: AtomicBool,
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            phase: AtomicU8::new(LifecyclePhase::NotStarted as u8),
            finalized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Moves to `to` if it is later than the current phase.
    pub(crate) fn advance(&self, to: LifecyclePhase) -> bool {
        self.phase
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (to as u8 > current).then_some(to as u8)
            })
            .is_ok()
    }

    /// True for the single caller that wins the transition.
    pub(crate) fn mark_finalized(&self) -> bool {
        self.finalized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// True for the single caller that wins the transition.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
