//! Queued event management.
//!
//! Script callbacks schedule follow-up work (tick callbacks, deferred emits)
//! by enqueuing a [`QueuedEvent`]. The dispatch adapter drains the queue after
//! every callback so the follow-up runs in the same loop turn, before the next
//! native completion is looked at.

use crate::event_loop::LoopScope;
use core_types::JsError;
use std::collections::VecDeque;

type QueuedFn = Box<dyn FnOnce(&mut LoopScope<'_>) -> Result<(), JsError>>;

/// A unit of follow-up work scheduled from the loop thread.
///
/// Queued events run on the loop thread only, so the closure does not need to
/// be `Send`. They receive a [`LoopScope`] and may enqueue further events,
/// which are drained in the same pass.
pub struct QueuedEvent {
    callback: QueuedFn,
}

impl QueuedEvent {
    /// Creates a new queued event from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut LoopScope<'_>) -> Result<(), JsError> + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the event.
    pub fn run(self, scope: &mut LoopScope<'_>) -> Result<(), JsError> {
        (self.callback)(scope)
    }
}

impl std::fmt::Debug for QueuedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QueuedEvent {{ ... }}")
    }
}

/// FIFO queue of [`QueuedEvent`]s.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<QueuedEvent>,
}

impl EventQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Adds an event to the end of the queue.
    pub fn enqueue(&mut self, event: QueuedEvent) {
        self.queue.push_back(event);
    }

    /// Removes and returns the oldest event.
    pub fn dequeue(&mut self) -> Option<QueuedEvent> {
        self.queue.pop_front()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
