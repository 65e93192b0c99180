//! App module - command parsing and the query surface
//!
//! Shared by the interactive CLI and by anything else driving a session.

mod commands;
pub mod surface;

pub use commands::*;
