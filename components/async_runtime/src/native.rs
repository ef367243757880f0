//! Native completion notifications.
//!
//! Native I/O and timers are serviced off the loop thread. When an operation
//! finishes, the servicing thread posts a [`Completion`] naming the handle it
//! belongs to and carrying a [`NativeEvent`] payload. Payloads are plain data
//! so they can cross threads; script code only ever sees them on the loop
//! thread.

use std::fmt;
use std::fs::Metadata;
use std::net::SocketAddr;
use std::time::SystemTime;

/// Identifies a handle or request registered with the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    /// The raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// File metadata delivered with stat and poll completions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileStats {
    /// Size in bytes
    pub size: u64,
    /// Whether the path is a directory
    pub is_dir: bool,
    /// Whether the path is read-only
    pub readonly: bool,
    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl From<&Metadata> for FileStats {
    fn from(meta: &Metadata) -> Self {
        Self {
            size: meta.len(),
            is_dir: meta.is_dir(),
            readonly: meta.permissions().readonly(),
            modified: meta.modified().ok(),
        }
    }
}

/// The payload of a native completion.
///
/// `error` fields carry the native error description when the operation
/// failed; `status` fields carry the native status code.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// Data read from a stream; `None` signals end of stream
    StreamRead { data: Option<Vec<u8>> },
    /// Data read from an IPC stream together with a passed handle
    StreamRead2 {
        data: Option<Vec<u8>>,
        pending: u64,
        handle_type: i32,
    },
    /// A stream write finished
    StreamWrite { status: i32, error: Option<String> },
    /// An outgoing connection finished
    StreamConnect { status: i32, error: Option<String> },
    /// A listening stream accepted a connection
    StreamConnection { status: i32, error: Option<String> },
    /// A stream shutdown finished
    StreamShutdown { status: i32, error: Option<String> },
    /// A stream was closed
    StreamClose,
    /// A generic file request finished
    File { error: Option<String> },
    /// A file was opened
    FileOpen { fd: i32, error: Option<String> },
    /// A file read finished
    FileRead {
        bytes_read: i64,
        data: Vec<u8>,
        error: Option<String>,
    },
    /// A file write finished
    FileWrite {
        bytes_written: i64,
        error: Option<String>,
    },
    /// A stat request finished
    FileStat {
        stats: Option<FileStats>,
        error: Option<String>,
    },
    /// A directory listing finished
    FileReadDir {
        names: Vec<String>,
        error: Option<String>,
    },
    /// A readlink request finished
    FileReadLink {
        target: Option<String>,
        error: Option<String>,
    },
    /// A utime request finished
    FileUtime { time: i64, error: Option<String> },
    /// A file was closed
    FileClose { fd: i32, error: Option<String> },
    /// A watched path changed
    FileEvent {
        status: i32,
        event: String,
        filename: String,
    },
    /// A polled path's stats changed
    FilePoll {
        status: i32,
        previous: Option<FileStats>,
        current: Option<FileStats>,
    },
    /// File polling stopped
    FilePollStop,
    /// A child process exited
    ProcessExit {
        status: i32,
        signal: i32,
        error: Option<String>,
    },
    /// A child process handle was closed
    ProcessClose,
    /// A timer fired
    Timer { status: i32 },
    /// A signal was delivered
    Signal { signum: i32 },
    /// A datagram arrived
    UdpRecv {
        nread: i64,
        data: Vec<u8>,
        address: Option<SocketAddr>,
    },
    /// A datagram send finished
    UdpSend { status: i32, error: Option<String> },
    /// A UDP handle was closed
    UdpClose,
    /// Idle phase callback
    Idle { status: i32 },
    /// Check phase callback
    Check { status: i32 },
    /// An async handle was woken from another thread
    Async,
}

impl NativeEvent {
    /// The callback category this payload belongs to.
    pub fn kind(&self) -> CallbackKind {
        match self {
            NativeEvent::StreamRead { .. } => CallbackKind::StreamRead,
            NativeEvent::StreamRead2 { .. } => CallbackKind::StreamRead2,
            NativeEvent::StreamWrite { .. } => CallbackKind::StreamWrite,
            NativeEvent::StreamConnect { .. } => CallbackKind::StreamConnect,
            NativeEvent::StreamConnection { .. } => CallbackKind::StreamConnection,
            NativeEvent::StreamShutdown { .. } => CallbackKind::StreamShutdown,
            NativeEvent::StreamClose => CallbackKind::StreamClose,
            NativeEvent::File { .. } => CallbackKind::File,
            NativeEvent::FileOpen { .. } => CallbackKind::FileOpen,
            NativeEvent::FileRead { .. } => CallbackKind::FileRead,
            NativeEvent::FileWrite { .. } => CallbackKind::FileWrite,
            NativeEvent::FileStat { .. } => CallbackKind::FileStat,
            NativeEvent::FileReadDir { .. } => CallbackKind::FileReadDir,
            NativeEvent::FileReadLink { .. } => CallbackKind::FileReadLink,
            NativeEvent::FileUtime { .. } => CallbackKind::FileUtime,
            NativeEvent::FileClose { .. } => CallbackKind::FileClose,
            NativeEvent::FileEvent { .. } => CallbackKind::FileEvent,
            NativeEvent::FilePoll { .. } => CallbackKind::FilePoll,
            NativeEvent::FilePollStop => CallbackKind::FilePollStop,
            NativeEvent::ProcessExit { .. } => CallbackKind::ProcessExit,
            NativeEvent::ProcessClose => CallbackKind::ProcessClose,
            NativeEvent::Timer { .. } => CallbackKind::Timer,
            NativeEvent::Signal { .. } => CallbackKind::Signal,
            NativeEvent::UdpRecv { .. } => CallbackKind::UdpRecv,
            NativeEvent::UdpSend { .. } => CallbackKind::UdpSend,
            NativeEvent::UdpClose => CallbackKind::UdpClose,
            NativeEvent::Idle { .. } => CallbackKind::Idle,
            NativeEvent::Check { .. } => CallbackKind::Check,
            NativeEvent::Async => CallbackKind::Async,
        }
    }
}

/// Category of a native completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CallbackKind {
    StreamRead,
    StreamRead2,
    StreamWrite,
    StreamConnect,
    StreamConnection,
    StreamShutdown,
    StreamClose,
    File,
    FileOpen,
    FileRead,
    FileWrite,
    FileStat,
    FileReadDir,
    FileReadLink,
    FileUtime,
    FileClose,
    FileEvent,
    FilePoll,
    FilePollStop,
    ProcessExit,
    ProcessClose,
    Timer,
    Signal,
    UdpRecv,
    UdpSend,
    UdpClose,
    Idle,
    Check,
    Async,
}

impl CallbackKind {
    /// Whether queued events are drained after a callback of this kind.
    ///
    /// Poll start/stop and process exit/close callbacks cannot produce further
    /// script-visible events in the same turn, so they skip the drain.
    pub fn drains_queued_events(self) -> bool {
        !matches!(
            self,
            CallbackKind::FilePoll
                | CallbackKind::FilePollStop
                | CallbackKind::ProcessExit
                | CallbackKind::ProcessClose
        )
    }

    /// Whether this completion is the last one its handle will ever deliver.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallbackKind::StreamClose
                | CallbackKind::ProcessClose
                | CallbackKind::UdpClose
                | CallbackKind::FilePollStop
        )
    }
}

/// A native completion addressed to a registered handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The handle or request the completion belongs to
    pub handle: HandleId,
    /// The completion payload
    pub event: NativeEvent,
}
