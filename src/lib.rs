//! sqlpeek - SQL against the SQLite connections of a debugged process
//!
//! The query layer (`query`) is written against the [`core::DebugControl`]
//! trait; `debug` provides the ptrace implementation used by the CLI.

pub mod app;
pub mod config;
pub mod core;
pub mod debug;
pub mod query;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod ui;
