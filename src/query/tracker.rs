//! Handle tracker
//!
//! Follows the target's SQLite connection lifecycle through internal entry
//! breakpoints. Breakpoints fire before the function body runs, so `open*`
//! only reveals where the new handle will be stored, while `prepare*` and
//! `close*` receive the handle itself.
//!
//! Only one connection is tracked. Entry hits from several threads are
//! applied in the order the backend reports them, so a multi-threaded
//! target can leave the tracker pointing at another thread's connection.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::core::{BreakpointId, DebugControl, DebugError, EntryFrame};

/// The connection currently believed live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackedHandle {
    #[default]
    None,
    /// Resolved connection handle
    Direct(u64),
    /// Address of the `sqlite3**` output slot of a pending open call
    Indirect(u64),
}

impl TrackedHandle {
    /// Entry to `sqlite3_open*`
    pub fn on_open(self, out_slot: u64) -> Self {
        TrackedHandle::Indirect(out_slot)
    }

    /// Entry to `sqlite3_prepare*`
    pub fn on_prepare(self, db: u64) -> Self {
        TrackedHandle::Direct(db)
    }

    /// Entry to `sqlite3_close*`. `deref` reads a pointer from the target.
    pub fn on_close<F>(self, db: u64, deref: F) -> Result<Self, DebugError>
    where
        F: FnOnce(u64) -> Result<u64, DebugError>,
    {
        let closed = match self {
            TrackedHandle::Indirect(slot) => deref(slot)? == db,
            TrackedHandle::Direct(value) => value == db,
            TrackedHandle::None => false,
        };
        Ok(if closed { TrackedHandle::None } else { self })
    }
}

impl fmt::Display for TrackedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedHandle::None => f.write_str("none"),
            TrackedHandle::Direct(value) => write!(f, "{:#x}", value),
            TrackedHandle::Indirect(slot) => write!(f, "*(sqlite3**){:#x}", slot),
        }
    }
}

/// Which transition an entry point drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Open,
    Prepare,
    Close,
}

impl EntryKind {
    /// Position of the argument the transition reads
    fn argument_index(self) -> usize {
        match self {
            // sqlite3_open*(filename, ppDb, ...)
            EntryKind::Open => 1,
            // sqlite3_prepare*(db, ...), sqlite3_close*(db)
            EntryKind::Prepare | EntryKind::Close => 0,
        }
    }

    /// Apply this transition to `state` using the halted frame
    pub fn apply(self, state: TrackedHandle, frame: &dyn EntryFrame) -> Result<TrackedHandle, DebugError> {
        let arg = frame.argument(self.argument_index())?;
        match self {
            EntryKind::Open => Ok(state.on_open(arg)),
            EntryKind::Prepare => Ok(state.on_prepare(arg)),
            EntryKind::Close => state.on_close(arg, |slot| frame.read_pointer(slot)),
        }
    }
}

/// An observed SQLite entry point
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    pub symbol: &'static str,
    pub kind: EntryKind,
    /// Installation aborts when a required symbol is missing
    pub required: bool,
}

const fn entry(symbol: &'static str, kind: EntryKind, required: bool) -> EntryPoint {
    EntryPoint {
        symbol,
        kind,
        required,
    }
}

pub const ENTRY_POINTS: &[EntryPoint] = &[
    entry("sqlite3_open", EntryKind::Open, true),
    entry("sqlite3_open16", EntryKind::Open, true),
    entry("sqlite3_open_v2", EntryKind::Open, true),
    entry("sqlite3_prepare", EntryKind::Prepare, true),
    entry("sqlite3_prepare_v2", EntryKind::Prepare, true),
    entry("sqlite3_prepare16", EntryKind::Prepare, true),
    entry("sqlite3_prepare16_v2", EntryKind::Prepare, true),
    entry("sqlite3_prepare_v3", EntryKind::Prepare, false),
    entry("sqlite3_prepare16_v3", EntryKind::Prepare, false),
    entry("sqlite3_close", EntryKind::Close, true),
    entry("sqlite3_close_v2", EntryKind::Close, false),
];

/// Breakpoint-driven tracker of the current connection handle
#[derive(Debug, Default)]
pub struct HandleTracker {
    state: Rc<Cell<TrackedHandle>>,
    breakpoints: Vec<BreakpointId>,
    installed: bool,
}

impl HandleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Read the current state
    pub fn current_handle(&self) -> TrackedHandle {
        self.state.get()
    }

    /// Place the entry breakpoints unless already placed for this process.
    ///
    /// On failure every breakpoint placed by this attempt is removed again
    /// and the tracker stays uninstalled, so a later event can retry.
    pub fn install<D: DebugControl + ?Sized>(&mut self, control: &mut D) -> Result<(), DebugError> {
        if self.installed {
            return Ok(());
        }
        self.state.set(TrackedHandle::None);

        let mut placed = Vec::with_capacity(ENTRY_POINTS.len());
        for entry in ENTRY_POINTS {
            let state = Rc::clone(&self.state);
            let EntryPoint { symbol, kind, .. } = *entry;
            let callback = Box::new(move |frame: &dyn EntryFrame| {
                let before = state.get();
                match kind.apply(before, frame) {
                    Ok(after) => {
                        if after != before {
                            log::debug!("{}: {:?} -> {:?}", symbol, before, after);
                        }
                        state.set(after);
                    }
                    Err(e) => log::debug!("{}: could not inspect arguments: {}", symbol, e),
                }
                false
            });

            match control.set_entry_breakpoint(symbol, callback) {
                Ok(id) => placed.push(id),
                Err(e) if !entry.required => {
                    log::debug!("Skipping optional entry point {}: {}", symbol, e);
                }
                Err(e) => {
                    for id in placed {
                        if let Err(remove_err) = control.remove_breakpoint(id) {
                            log::warn!("Failed to remove breakpoint {}: {}", id, remove_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        log::info!("Tracking SQLite handles ({} entry breakpoints)", placed.len());
        self.breakpoints = placed;
        self.installed = true;
        Ok(())
    }

    /// Forget state and breakpoints after the process went away
    pub fn reset(&mut self) {
        self.state.set(TrackedHandle::None);
        self.breakpoints.clear();
        self.installed = false;
    }
}
