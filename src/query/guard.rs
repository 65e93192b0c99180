//! Breakpoint guard
//!
//! User breakpoints are switched off around every in-process call so the
//! call cannot stop half way, e.g. on a breakpoint the user placed inside
//! SQLite itself. Internal breakpoints are not user breakpoints and stay
//! armed.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use crate::core::{BreakpointId, DebugControl, DebugError};

/// Prior enabled flag of every user breakpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedBreakpointState {
    enabled: BTreeMap<BreakpointId, bool>,
}

impl SavedBreakpointState {
    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn was_enabled(&self, id: BreakpointId) -> Option<bool> {
        self.enabled.get(&id).copied()
    }
}

/// Capture the enabled flags of all user breakpoints and disable them.
///
/// If disabling fails part way, the breakpoints already disabled are
/// restored before the error is returned.
pub fn disable_all<D: DebugControl + ?Sized>(control: &mut D) -> Result<SavedBreakpointState, DebugError> {
    let mut saved = SavedBreakpointState::default();
    for bp in control.breakpoints() {
        saved.enabled.insert(bp.id, bp.enabled);
    }

    for (&id, &enabled) in &saved.enabled {
        if !enabled {
            continue;
        }
        if let Err(e) = control.set_breakpoint_enabled(id, false) {
            restore(control, &saved);
            return Err(e);
        }
    }
    Ok(saved)
}

/// Re-enable exactly the breakpoints that were enabled when `saved` was taken.
///
/// Breakpoints deleted in the meantime are skipped.
pub fn restore<D: DebugControl + ?Sized>(control: &mut D, saved: &SavedBreakpointState) {
    let current = control.breakpoints();
    for (&id, &enabled) in &saved.enabled {
        let Some(bp) = current.iter().find(|bp| bp.id == id) else {
            continue;
        };
        if bp.enabled == enabled {
            continue;
        }
        if let Err(e) = control.set_breakpoint_enabled(id, enabled) {
            log::warn!("Failed to restore breakpoint {}: {}", id, e);
        }
    }
}

/// Scoped suspension of user breakpoints; restores them when dropped
pub struct BreakpointGuard<'a, D: DebugControl + ?Sized> {
    control: &'a mut D,
    saved: SavedBreakpointState,
}

impl<'a, D: DebugControl + ?Sized> BreakpointGuard<'a, D> {
    pub fn suspend(control: &'a mut D) -> Result<Self, DebugError> {
        let saved = disable_all(control)?;
        if !saved.is_empty() {
            log::trace!("Suspended {} user breakpoints", saved.len());
        }
        Ok(Self { control, saved })
    }
}

impl<D: DebugControl + ?Sized> Deref for BreakpointGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        &*self.control
    }
}

impl<D: DebugControl + ?Sized> DerefMut for BreakpointGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut *self.control
    }
}

impl<D: DebugControl + ?Sized> Drop for BreakpointGuard<'_, D> {
    fn drop(&mut self) {
        restore(&mut *self.control, &self.saved);
    }
}
