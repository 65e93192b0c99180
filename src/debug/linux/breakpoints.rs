//! Software breakpoint table.
//!
//! Several breakpoints may share an address (a user breakpoint on
//! `sqlite3_prepare_v2` next to the tracker's). An address is armed with
//! `int3` while at least one enabled breakpoint refers to it.

use std::collections::{BTreeMap, HashMap};

use crate::core::memory::{MemoryError, MemoryManager};
use crate::core::{BreakpointId, BreakpointInfo, DebugError, EntryCallback};

pub const INT3: u8 = 0xCC;

/// Software breakpoint
pub struct Breakpoint {
    pub id: BreakpointId,
    pub symbol: String,
    /// Resolved address, `None` until the symbol is mapped
    pub address: Option<u64>,
    pub enabled: bool,
    pub hit_count: u32,
    /// Internal breakpoints run this instead of stopping
    pub callback: Option<EntryCallback>,
}

impl Breakpoint {
    pub fn is_internal(&self) -> bool {
        self.callback.is_some()
    }

    pub fn info(&self) -> BreakpointInfo {
        BreakpointInfo {
            id: self.id,
            location: self.symbol.clone(),
            address: self.address.unwrap_or(0),
            enabled: self.enabled,
            hit_count: self.hit_count,
        }
    }
}

#[derive(Default)]
pub struct BreakpointTable {
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    /// Armed addresses and the original byte under the `int3`
    sites: HashMap<u64, u8>,
    next_id: BreakpointId,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        symbol: &str,
        address: Option<u64>,
        callback: Option<EntryCallback>,
    ) -> BreakpointId {
        self.next_id += 1;
        let id = self.next_id;
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                symbol: symbol.to_string(),
                address,
                enabled: true,
                hit_count: 0,
                callback,
            },
        );
        id
    }

    pub fn remove(&mut self, id: BreakpointId) -> Result<Breakpoint, DebugError> {
        self.breakpoints
            .remove(&id)
            .ok_or(DebugError::UnknownBreakpoint(id))
    }

    pub fn get_mut(&mut self, id: BreakpointId) -> Result<&mut Breakpoint, DebugError> {
        self.breakpoints
            .get_mut(&id)
            .ok_or(DebugError::UnknownBreakpoint(id))
    }

    /// User breakpoints in id order
    pub fn user_breakpoints(&self) -> Vec<BreakpointInfo> {
        self.breakpoints
            .values()
            .filter(|bp| !bp.is_internal())
            .map(Breakpoint::info)
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Breakpoint> {
        self.breakpoints.values_mut()
    }

    /// Ids of enabled breakpoints at `address`
    pub fn enabled_at(&self, address: u64) -> Vec<BreakpointId> {
        self.breakpoints
            .values()
            .filter(|bp| bp.enabled && bp.address == Some(address))
            .map(|bp| bp.id)
            .collect()
    }

    pub fn is_armed(&self, address: u64) -> bool {
        self.sites.contains_key(&address)
    }

    /// Original byte at an armed address
    pub fn original_byte(&self, address: u64) -> Option<u8> {
        self.sites.get(&address).copied()
    }

    /// Arm or disarm `address` to match the breakpoints referring to it
    pub fn sync_site(&mut self, memory: &MemoryManager, address: u64) -> Result<(), DebugError> {
        let failed = |e: MemoryError| DebugError::BreakpointError {
            address,
            reason: e.to_string(),
        };
        let wanted = !self.enabled_at(address).is_empty();
        match (wanted, self.sites.get(&address).copied()) {
            (true, None) => {
                let original = memory.read_u8(address).map_err(failed)?;
                memory.write(address, &[INT3]).map_err(failed)?;
                self.sites.insert(address, original);
                log::trace!("Armed {:#x}", address);
            }
            (false, Some(original)) => {
                memory.write(address, &[original]).map_err(failed)?;
                self.sites.remove(&address);
                log::trace!("Disarmed {:#x}", address);
            }
            _ => {}
        }
        Ok(())
    }

    /// Restore every original byte (before detaching)
    pub fn disarm_all(&mut self, memory: &MemoryManager) {
        for (address, original) in self.sites.drain() {
            if let Err(e) = memory.write(address, &[original]) {
                log::warn!("Failed to remove breakpoint at {:#x}: {}", address, e);
            }
        }
    }

    /// The process is gone: forget armed sites and internal breakpoints,
    /// keep user breakpoints for the next run.
    pub fn forget_process(&mut self) {
        self.sites.clear();
        self.breakpoints.retain(|_, bp| !bp.is_internal());
        for bp in self.breakpoints.values_mut() {
            bp.address = None;
        }
    }
}
