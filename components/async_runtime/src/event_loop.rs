//! Event loop implementation.
//!
//! The loop owns every script-visible callback and runs them on the thread
//! that calls [`EventLoop::run`] (the loop thread). Other threads talk to it
//! only through a [`LoopHandle`] or an [`AsyncHandle`], which post messages on
//! a channel. Each turn:
//! 1. drains queued events,
//! 2. fires due timers,
//! 3. dispatches native completions in delivery order,
//! 4. blocks for the next completion or timer deadline while referenced
//!    handles, pending requests or queued events remain.

use crate::dispatch::{Callback, DispatchAdapter, DispatchStats, ExceptionHandler};
use crate::native::{Completion, HandleId, NativeEvent};
use crate::task_queue::{EventQueue, QueuedEvent};
use crate::thread_pool::ThreadPool;
use core_types::JsError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Version of the native loop this crate provides.
pub const LOOP_VERSION: &str = "0.11.22";

const MIN_REPEAT: Duration = Duration::from_millis(1);

/// Loop construction parameters.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Working directory reported to scripts
    pub work_dir: PathBuf,
    /// Instance number when several loops share a process
    pub instance_number: u32,
    /// Size of the blocking-work pool
    pub worker_threads: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            instance_number: 0,
            worker_threads: 4,
        }
    }
}

pub(crate) enum LoopMessage {
    Completion(Completion),
    Wake,
}

struct LoopShared {
    sender: Sender<LoopMessage>,
    stopped: AtomicBool,
    next_id: AtomicU64,
    config: LoopConfig,
    pool: ThreadPool,
}

/// Thread-safe handle to a loop.
///
/// Cloning is cheap. Any thread may post completions, stop the loop or query
/// its configuration; none of these touch loop-owned state directly.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Posts a native completion for `handle`. Returns false if the loop is
    /// gone.
    pub fn post(&self, handle: HandleId, event: NativeEvent) -> bool {
        self.shared
            .sender
            .send(LoopMessage::Completion(Completion { handle, event }))
            .is_ok()
    }

    /// Requests the loop to stop and wakes it.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.shared.sender.send(LoopMessage::Wake);
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Whether the loop's worker pool has been released.
    pub fn is_shutdown(&self) -> bool {
        self.shared.pool.is_shutdown()
    }

    /// The loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.shared.config
    }

    /// Working directory reported to scripts.
    pub fn work_dir(&self) -> &Path {
        &self.shared.config.work_dir
    }

    /// Instance number of this loop.
    pub fn instance_number(&self) -> u32 {
        self.shared.config.instance_number
    }

    /// Version of the native loop.
    pub fn version(&self) -> &'static str {
        LOOP_VERSION
    }

    fn next_id(&self) -> HandleId {
        HandleId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("instance", &self.shared.config.instance_number)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Wakes a loop callback from any thread.
///
/// Created on the loop thread with [`LoopScope::new_async`]; `send` may be
/// called from anywhere and results in one `Async` completion being
/// dispatched to the callback on the loop thread.
#[derive(Clone)]
pub struct AsyncHandle {
    id: HandleId,
    sender: Sender<LoopMessage>,
}

impl AsyncHandle {
    /// The handle id.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Schedules the callback. Returns false if the loop is gone.
    pub fn send(&self) -> bool {
        self.sender
            .send(LoopMessage::Completion(Completion {
                handle: self.id,
                event: NativeEvent::Async,
            }))
            .is_ok()
    }
}

impl std::fmt::Debug for AsyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AsyncHandle").field(&self.id).finish()
    }
}

struct TimerState {
    seq: u64,
    repeat: Option<Duration>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: HandleId,
}

struct Registration {
    callback: Option<Callback>,
    referenced: bool,
    one_shot: bool,
    timer: Option<TimerState>,
}

/// Loop-thread state reachable from callbacks through a [`LoopScope`].
pub(crate) struct LoopCore {
    handle: LoopHandle,
    registry: HashMap<HandleId, Registration>,
    queue: EventQueue,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    timer_seq: u64,
}

impl LoopCore {
    pub(crate) fn dequeue(&mut self) -> Option<QueuedEvent> {
        self.queue.dequeue()
    }

    fn has_pending_work(&self) -> bool {
        !self.queue.is_empty() || self.registry.values().any(|r| r.referenced)
    }

    fn register(&mut self, callback: Callback, one_shot: bool) -> HandleId {
        let id = self.handle.next_id();
        self.registry.insert(
            id,
            Registration {
                callback: Some(callback),
                referenced: true,
                one_shot,
                timer: None,
            },
        );
        id
    }

    fn arm_timer(&mut self, id: HandleId, deadline: Instant, repeat: Option<Duration>) {
        self.timer_seq += 1;
        let seq = self.timer_seq;
        if let Some(registration) = self.registry.get_mut(&id) {
            registration.timer = Some(TimerState { seq, repeat });
            self.timers.push(Reverse(TimerEntry { deadline, seq, id }));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(entry)| entry.deadline)
    }
}

/// Access to loop-owned state for code running on the loop thread.
///
/// Callbacks, queued events and the system scripts receive a scope; it is the
/// only way to register handles and requests.
pub struct LoopScope<'a> {
    core: &'a mut LoopCore,
}

impl<'a> LoopScope<'a> {
    pub(crate) fn new(core: &'a mut LoopCore) -> Self {
        Self { core }
    }

    /// Thread-safe handle to this loop.
    pub fn handle(&self) -> &LoopHandle {
        &self.core.handle
    }

    /// Queues follow-up work, run before the next native completion.
    pub fn enqueue<F>(&mut self, f: F)
    where
        F: FnOnce(&mut LoopScope<'_>) -> Result<(), JsError> + 'static,
    {
        self.core.queue.enqueue(QueuedEvent::new(f));
    }

    /// Registers a long-lived handle. It keeps the loop alive until closed or
    /// unreferenced.
    pub fn open<F>(&mut self, callback: F) -> HandleId
    where
        F: FnMut(&mut LoopScope<'_>, &NativeEvent) -> Result<(), JsError> + 'static,
    {
        self.core.register(Box::new(callback), false)
    }

    /// Registers a one-shot request; its callback runs for the first
    /// completion only and the registration is then released.
    pub fn request<F>(&mut self, callback: F) -> HandleId
    where
        F: FnOnce(&mut LoopScope<'_>, &NativeEvent) -> Result<(), JsError> + 'static,
    {
        let mut callback = Some(callback);
        self.core.register(
            Box::new(move |scope: &mut LoopScope<'_>, event: &NativeEvent| match callback.take() {
                Some(f) => f(scope, event),
                None => Ok(()),
            }),
            true,
        )
    }

    /// Runs `job` on the worker pool and delivers its event to `callback`
    /// on the loop thread.
    pub fn submit<F, J>(&mut self, callback: F, job: J) -> HandleId
    where
        F: FnOnce(&mut LoopScope<'_>, &NativeEvent) -> Result<(), JsError> + 'static,
        J: FnOnce() -> NativeEvent + Send + 'static,
    {
        let id = self.request(callback);
        let sender = self.core.handle.shared.sender.clone();
        let accepted = self.core.handle.shared.pool.execute(move || {
            let event = job();
            let _ = sender.send(LoopMessage::Completion(Completion { handle: id, event }));
        });
        if !accepted {
            tracing::warn!(handle = %id, "worker pool unavailable, request dropped");
            self.core.registry.remove(&id);
        }
        id
    }

    /// Creates an async handle whose callback can be triggered from any
    /// thread.
    pub fn new_async<F>(&mut self, callback: F) -> AsyncHandle
    where
        F: FnMut(&mut LoopScope<'_>, &NativeEvent) -> Result<(), JsError> + 'static,
    {
        let id = self.open(callback);
        AsyncHandle {
            id,
            sender: self.core.handle.shared.sender.clone(),
        }
    }

    /// Starts a timer firing after `delay`, then every `repeat` if given.
    pub fn set_timer<F>(&mut self, delay: Duration, repeat: Option<Duration>, callback: F) -> HandleId
    where
        F: FnMut(&mut LoopScope<'_>, &NativeEvent) -> Result<(), JsError> + 'static,
    {
        let id = self.core.register(Box::new(callback), repeat.is_none());
        self.core
            .arm_timer(id, Instant::now() + delay, repeat.map(|r| r.max(MIN_REPEAT)));
        id
    }

    /// Stops `id` from keeping the loop alive.
    pub fn unref(&mut self, id: HandleId) {
        if let Some(registration) = self.core.registry.get_mut(&id) {
            registration.referenced = false;
        }
    }

    /// Makes `id` keep the loop alive again.
    pub fn reference(&mut self, id: HandleId) {
        if let Some(registration) = self.core.registry.get_mut(&id) {
            registration.referenced = true;
        }
    }

    /// Closes a handle or cancels a request. Later completions for it are
    /// dropped. Returns false if it was not registered.
    pub fn close(&mut self, id: HandleId) -> bool {
        self.core.registry.remove(&id).is_some()
    }

    /// Whether `id` is still registered.
    pub fn is_active(&self, id: HandleId) -> bool {
        self.core.registry.contains_key(&id)
    }

    /// Number of registered handles and requests.
    pub fn active_handles(&self) -> usize {
        self.core.registry.len()
    }

    /// Number of queued events not yet drained.
    pub fn queued_events(&self) -> usize {
        self.core.queue.len()
    }
}

/// The single-threaded event loop.
///
/// # Examples
///
/// ```
/// use async_runtime::{EventLoop, LoopConfig};
/// use std::time::Duration;
///
/// let mut event_loop = EventLoop::new(LoopConfig::default());
/// event_loop.scope().set_timer(Duration::from_millis(1), None, |scope, _| {
///     scope.enqueue(|_| Ok(()));
///     Ok(())
/// });
/// event_loop.run().unwrap();
/// ```
pub struct EventLoop {
    core: LoopCore,
    receiver: Receiver<LoopMessage>,
    adapter: DispatchAdapter,
}

impl EventLoop {
    /// Creates a loop with no handles and the default exception handler.
    pub fn new(config: LoopConfig) -> Self {
        let (sender, receiver) = channel::unbounded();
        let pool = ThreadPool::new(
            format!("loop-{}-worker", config.instance_number),
            config.worker_threads,
        );
        let handle = LoopHandle {
            shared: Arc::new(LoopShared {
                sender,
                stopped: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                config,
                pool,
            }),
        };
        Self {
            core: LoopCore {
                handle,
                registry: HashMap::new(),
                queue: EventQueue::new(),
                timers: BinaryHeap::new(),
                timer_seq: 0,
            },
            receiver,
            adapter: DispatchAdapter::new(),
        }
    }

    /// Thread-safe handle to this loop.
    pub fn handle(&self) -> LoopHandle {
        self.core.handle.clone()
    }

    /// Scope for registering work from the loop thread outside a callback.
    pub fn scope(&mut self) -> LoopScope<'_> {
        LoopScope::new(&mut self.core)
    }

    /// Installs the exception handler used for every callback error.
    pub fn set_exception_handler(&mut self, handler: impl ExceptionHandler + 'static) {
        self.adapter.set_handler(handler);
    }

    /// Offers an error raised outside dispatch (e.g. by a system script) to
    /// the exception handler. Returns true if it was recovered.
    pub fn handle_callback_exception(&mut self, error: &JsError) -> bool {
        self.adapter.consult(error)
    }

    /// Drains queued events now. Returns the first unrecovered error.
    pub fn process_queued_events(&mut self) -> Result<(), JsError> {
        self.adapter.drain(&mut self.core);
        match self.adapter.take_fatal() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Runs until no referenced handles, requests or queued events remain,
    /// until stopped, or until a callback error is declared fatal.
    pub fn run(&mut self) -> Result<(), JsError> {
        tracing::debug!(instance = self.core.handle.instance_number(), "event loop running");
        loop {
            self.adapter.drain(&mut self.core);
            if self.checkpoint()? {
                break;
            }

            self.fire_due_timers();
            if self.checkpoint()? {
                break;
            }

            while let Ok(message) = self.receiver.try_recv() {
                self.process(message);
                if self.adapter.has_fatal() || self.stopped() {
                    break;
                }
            }
            if self.checkpoint()? {
                break;
            }

            if !self.core.has_pending_work() {
                break;
            }

            let message = match self.core.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.receiver.recv_timeout(timeout) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
                    }
                }
                None => self.receiver.recv().ok(),
            };
            if let Some(message) = message {
                self.process(message);
            }
        }
        tracing::debug!(instance = self.core.handle.instance_number(), "event loop finished");
        Ok(())
    }

    /// Requests the loop to stop at the next checkpoint.
    pub fn stop(&self) {
        self.core.handle.stop();
    }

    /// Stops the loop and releases its worker pool, waiting for running jobs.
    /// Later [`LoopScope::submit`] requests are dropped.
    pub fn shutdown(&mut self) {
        self.stop();
        self.core.handle.shared.pool.shutdown();
        tracing::debug!(instance = self.core.handle.instance_number(), "event loop shut down");
    }

    /// Whether the loop has been stopped.
    pub fn stopped(&self) -> bool {
        self.core.handle.is_stopped()
    }

    /// Dispatch counters.
    pub fn stats(&self) -> DispatchStats {
        self.adapter.stats()
    }

    /// Returns `Err` with a pending fatal error, `Ok(true)` if stopped.
    fn checkpoint(&mut self) -> Result<bool, JsError> {
        if let Some(error) = self.adapter.take_fatal() {
            return Err(error);
        }
        Ok(self.stopped())
    }

    fn process(&mut self, message: LoopMessage) {
        match message {
            LoopMessage::Completion(completion) => self.dispatch_completion(completion),
            LoopMessage::Wake => {}
        }
    }

    fn dispatch_completion(&mut self, completion: Completion) {
        let Completion { handle, event } = completion;
        let kind = event.kind();
        let Some(registration) = self.core.registry.get_mut(&handle) else {
            tracing::trace!(%handle, ?kind, "completion for closed handle dropped");
            return;
        };
        let Some(mut callback) = registration.callback.take() else {
            return;
        };
        let finished = registration.one_shot || kind.is_terminal();

        self.adapter
            .dispatch(&mut self.core, handle, &mut callback, &event);

        if finished {
            self.core.registry.remove(&handle);
        } else if let Some(registration) = self.core.registry.get_mut(&handle) {
            registration.callback = Some(callback);
        }
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(entry)) = self.core.timers.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = self.core.timers.pop() else {
                break;
            };
            let repeat = match self
                .core
                .registry
                .get(&entry.id)
                .and_then(|r| r.timer.as_ref())
            {
                Some(timer) if timer.seq == entry.seq => timer.repeat,
                _ => continue,
            };
            if let Some(interval) = repeat {
                self.core.arm_timer(entry.id, entry.deadline + interval, Some(interval));
            }
            self.dispatch_completion(Completion {
                handle: entry.id,
                event: NativeEvent::Timer { status: 0 },
            });
            if self.adapter.has_fatal() || self.stopped() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.core.handle)
            .field("registered", &self.core.registry.len())
            .field("queued", &self.core.queue.len())
            .field("adapter", &self.adapter)
            .finish()
    }
}
