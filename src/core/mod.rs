//! Core module - Debug control interface and low-level operations
//!
//! This module contains the backend-independent debugger contract, the
//! typed in-process call description and memory access utilities.

pub mod call;
pub mod debugger;
pub mod memory;

// Re-export common types
pub use call::{CallArg, InferiorCall};
pub use debugger::{
    BreakpointId, BreakpointInfo, DebugControl, DebugError, EntryCallback, EntryFrame,
    LifecycleEvent, StopReason,
};
