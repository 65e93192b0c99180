//! Debug module - Concrete debugger backends.
//!
//! Provides the process control the query layer runs on:
//! - Launch/attach/detach/kill
//! - Symbol breakpoints (user and internal)
//! - In-process function calls

pub mod types;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use linux::PtraceDebugger as PlatformDebugger;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use linux::enumerate_processes;
