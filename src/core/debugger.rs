//! Debugger - Debug Control Interface
//!
//! The primitives every backend must provide to the query layer: internal
//! entry breakpoints with callbacks, enumeration and toggling of user
//! breakpoints, memory reads and synchronous in-process calls.

use std::fmt;

use thiserror::Error;

use crate::core::call::InferiorCall;
use crate::core::memory::MemoryError;

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("Failed to detach from process {pid}: {reason}")]
    DetachFailed { pid: u32, reason: String },

    #[error("No process is running")]
    NotRunning,

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Breakpoint error at {address:#x}: {reason}")]
    BreakpointError { address: u64, reason: String },

    #[error("No breakpoint number {0}")]
    UnknownBreakpoint(BreakpointId),

    #[error("Call to {function} failed: {reason}")]
    CallFailed { function: String, reason: String },

    #[error("Debug event error: {0}")]
    EventError(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Breakpoint number, unique for the lifetime of a backend
pub type BreakpointId = u32;

/// User-visible breakpoint, as listed by [`DebugControl::breakpoints`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo {
    pub id: BreakpointId,
    /// Symbol the breakpoint was requested on
    pub location: String,
    /// Resolved address (0 while the symbol is not mapped)
    pub address: u64,
    pub enabled: bool,
    pub hit_count: u32,
}

/// Why the target stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Launched program reached its entry point
    Entry,
    /// Attached to a running process
    Attached,
    /// A user breakpoint was hit
    Breakpoint { id: BreakpointId, location: String },
    /// The target received a signal
    Signal(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Entry => write!(f, "program entry point"),
            StopReason::Attached => write!(f, "attached"),
            StopReason::Breakpoint { id, location } => write!(f, "breakpoint {} ({})", id, location),
            StopReason::Signal(name) => write!(f, "signal {}", name),
        }
    }
}

/// Process lifecycle events delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The target halted and control returned to the user
    Stopped(StopReason),
    /// New code was mapped; breakpoints by symbol may need to be placed again
    NewCodeLoaded,
    /// The target exited or was detached (`code` is `None` for detach/kill)
    Exited { code: Option<i32> },
}

/// Argument view of a thread halted on the first instruction of a function.
///
/// Arguments are indexed by their position in the C prototype.
pub trait EntryFrame {
    fn argument(&self, index: usize) -> Result<u64, DebugError>;

    /// Read a pointer-sized value from target memory
    fn read_pointer(&self, address: u64) -> Result<u64, DebugError>;
}

/// Callback for internal entry breakpoints. Returning `true` stops the target.
pub type EntryCallback = Box<dyn FnMut(&dyn EntryFrame) -> bool>;

/// Main debugger interface consumed by the query layer
pub trait DebugControl {
    /// Whether a live process is attached and able to execute calls
    fn is_running(&self) -> bool;

    /// Place an internal, non-interactive breakpoint on entry to `symbol`.
    ///
    /// Internal breakpoints are not listed by [`DebugControl::breakpoints`].
    fn set_entry_breakpoint(
        &mut self,
        symbol: &str,
        callback: EntryCallback,
    ) -> Result<BreakpointId, DebugError>;

    /// Remove an internal or user breakpoint
    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<(), DebugError>;

    /// Enumerate user breakpoints with their enabled flags
    fn breakpoints(&self) -> Vec<BreakpointInfo>;

    /// Enable or disable a user breakpoint
    fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<(), DebugError>;

    /// Invoke a function inside the halted process and return its integer result
    fn call(&mut self, call: &InferiorCall) -> Result<u64, DebugError>;

    /// Read a pointer-sized value from target memory
    fn read_pointer(&self, address: u64) -> Result<u64, DebugError>;

    /// Read a NUL-terminated byte string from target memory
    fn read_c_string(&self, address: u64) -> Result<Vec<u8>, DebugError>;

    /// Lifecycle events queued since the last drain, oldest first.
    ///
    /// Covers what no command result carried: a process that died during a
    /// call, or one killed by a launch that then failed.
    fn take_events(&mut self) -> Vec<LifecycleEvent>;
}
