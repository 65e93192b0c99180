//! Query module - SQL against the target's in-memory SQLite connections
//!
//! - `tracker`: which connection handle is current
//! - `helper`: native helper library attachment
//! - `guard`: user breakpoint suspension around in-process calls
//! - `bridge`: the four query operations
//! - `session`: per debug session state and lifecycle handling

pub mod bridge;
pub mod error;
pub mod guard;
pub mod helper;
pub mod session;
pub mod tracker;

pub use error::QueryError;
pub use guard::{BreakpointGuard, SavedBreakpointState};
pub use session::Session;
pub use tracker::{HandleTracker, TrackedHandle};
