//! Scripted in-memory debugger for the query layer tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};

use sqlpeek::config::Config;
use sqlpeek::core::{
    BreakpointId, BreakpointInfo, CallArg, DebugControl, DebugError, EntryCallback, EntryFrame,
    InferiorCall, LifecycleEvent,
};
use sqlpeek::query::Session;

pub const DB: u64 = 0x5555_0000_a000;
pub const OTHER_DB: u64 = 0x5555_0000_b000;
pub const SLOT: u64 = 0x7ffe_0000_1000;
pub const BUFFER: u64 = 0x5555_0001_0000;
pub const DL_ERROR: u64 = 0x7f00_0000_2000;

struct ScriptFrame<'a> {
    args: &'a [u64],
    memory: &'a HashMap<u64, u64>,
}

impl EntryFrame for ScriptFrame<'_> {
    fn argument(&self, index: usize) -> Result<u64, DebugError> {
        Ok(self.args.get(index).copied().unwrap_or(0))
    }

    fn read_pointer(&self, address: u64) -> Result<u64, DebugError> {
        read_word(self.memory, address)
    }
}

fn read_word(memory: &HashMap<u64, u64>, address: u64) -> Result<u64, DebugError> {
    memory
        .get(&address)
        .copied()
        .ok_or_else(|| DebugError::EventError(format!("unmapped {:#x}", address)))
}

/// Records every call, toggle and free; call results are scripted per function
pub struct ScriptedDebugger {
    pub running: bool,
    /// Symbols `set_entry_breakpoint` cannot find
    pub missing_symbols: HashSet<String>,
    entry: BTreeMap<BreakpointId, (String, EntryCallback)>,
    user: BTreeMap<BreakpointId, BreakpointInfo>,
    next_id: BreakpointId,
    pub calls: Vec<InferiorCall>,
    /// Enabled flags of the user breakpoints at the time of each call
    pub enabled_during_calls: Vec<Vec<bool>>,
    pub toggles: Vec<(BreakpointId, bool)>,
    pub results: HashMap<String, Result<u64, String>>,
    pub memory: HashMap<u64, u64>,
    pub strings: HashMap<u64, Vec<u8>>,
    /// The process dies inside a call to this function
    pub dies_in: Option<String>,
    queued: Vec<LifecycleEvent>,
}

impl ScriptedDebugger {
    pub fn new() -> Self {
        let mut results = HashMap::new();
        results.insert("dlopen".to_string(), Ok(0x7f00_0000_1000));
        results.insert("dlerror".to_string(), Ok(0));
        results.insert("sdh_exec".to_string(), Ok(BUFFER));
        results.insert("sdh_exec_at".to_string(), Ok(BUFFER));
        results.insert("sdh_exec_count".to_string(), Ok(3));
        results.insert("free".to_string(), Ok(0));

        let mut strings = HashMap::new();
        strings.insert(BUFFER, b"1|one\n2|two\n".to_vec());

        Self {
            running: true,
            missing_symbols: HashSet::new(),
            entry: BTreeMap::new(),
            user: BTreeMap::new(),
            next_id: 0,
            calls: Vec::new(),
            enabled_during_calls: Vec::new(),
            toggles: Vec::new(),
            results,
            memory: HashMap::new(),
            strings,
            dies_in: None,
            queued: Vec::new(),
        }
    }

    pub fn returns(&mut self, function: &str, value: u64) {
        self.results.insert(function.to_string(), Ok(value));
    }

    pub fn fails(&mut self, function: &str, reason: &str) {
        self.results.insert(function.to_string(), Err(reason.to_string()));
    }

    pub fn add_user_breakpoint(&mut self, location: &str, enabled: bool) -> BreakpointId {
        self.next_id += 1;
        let id = self.next_id;
        self.user.insert(
            id,
            BreakpointInfo {
                id,
                location: location.to_string(),
                address: 0x1000 * id as u64,
                enabled,
                hit_count: 0,
            },
        );
        id
    }

    pub fn user_flags(&self) -> Vec<bool> {
        self.user.values().map(|bp| bp.enabled).collect()
    }

    /// Symbols with an internal breakpoint, in placement order
    pub fn entry_symbols(&self) -> Vec<String> {
        self.entry.values().map(|(symbol, _)| symbol.clone()).collect()
    }

    /// Fire the internal breakpoints on `symbol` with the given arguments.
    /// Returns whether any callback asked to stop.
    pub fn hit(&mut self, symbol: &str, args: &[u64]) -> bool {
        let frame = ScriptFrame {
            args,
            memory: &self.memory,
        };
        let mut stop = false;
        for (name, callback) in self.entry.values_mut() {
            if name == symbol {
                stop |= callback(&frame);
            }
        }
        stop
    }

    /// The process went away; the backend drops internal breakpoints
    pub fn exit(&mut self) {
        self.running = false;
        self.entry.clear();
    }

    /// The process went away and the exit was only queued, the way a
    /// relaunch that kills the target and then fails reports it
    pub fn lose_process(&mut self) {
        self.exit();
        self.queued.push(LifecycleEvent::Exited { code: None });
    }

    pub fn calls_to(&self, function: &str) -> Vec<&InferiorCall> {
        self.calls.iter().filter(|call| call.function == function).collect()
    }

    pub fn freed(&self) -> Vec<u64> {
        self.calls_to("free")
            .into_iter()
            .filter_map(|call| match call.args.first() {
                Some(CallArg::Pointer(address)) => Some(*address),
                _ => None,
            })
            .collect()
    }
}

impl DebugControl for ScriptedDebugger {
    fn is_running(&self) -> bool {
        self.running
    }

    fn set_entry_breakpoint(
        &mut self,
        symbol: &str,
        callback: EntryCallback,
    ) -> Result<BreakpointId, DebugError> {
        if !self.running {
            return Err(DebugError::NotRunning);
        }
        if self.missing_symbols.contains(symbol) {
            return Err(DebugError::SymbolNotFound(symbol.to_string()));
        }
        self.next_id += 1;
        self.entry.insert(self.next_id, (symbol.to_string(), callback));
        Ok(self.next_id)
    }

    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<(), DebugError> {
        if self.entry.remove(&id).is_some() || self.user.remove(&id).is_some() {
            Ok(())
        } else {
            Err(DebugError::UnknownBreakpoint(id))
        }
    }

    fn breakpoints(&self) -> Vec<BreakpointInfo> {
        self.user.values().cloned().collect()
    }

    fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<(), DebugError> {
        let bp = self.user.get_mut(&id).ok_or(DebugError::UnknownBreakpoint(id))?;
        bp.enabled = enabled;
        self.toggles.push((id, enabled));
        Ok(())
    }

    fn call(&mut self, call: &InferiorCall) -> Result<u64, DebugError> {
        if !self.running {
            return Err(DebugError::NotRunning);
        }
        self.enabled_during_calls.push(self.user_flags());
        self.calls.push(call.clone());
        if self.dies_in.as_deref() == Some(call.function.as_str()) {
            self.lose_process();
            return Err(DebugError::CallFailed {
                function: call.function.clone(),
                reason: "process exited (None)".into(),
            });
        }
        match self.results.get(&call.function) {
            Some(Ok(value)) => Ok(*value),
            Some(Err(reason)) => Err(DebugError::CallFailed {
                function: call.function.clone(),
                reason: reason.clone(),
            }),
            None => Err(DebugError::SymbolNotFound(call.function.clone())),
        }
    }

    fn read_pointer(&self, address: u64) -> Result<u64, DebugError> {
        read_word(&self.memory, address)
    }

    fn read_c_string(&self, address: u64) -> Result<Vec<u8>, DebugError> {
        self.strings
            .get(&address)
            .cloned()
            .ok_or_else(|| DebugError::EventError(format!("unmapped {:#x}", address)))
    }

    fn take_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.queued)
    }
}

pub fn config() -> Config {
    Config {
        helper_path: "/opt/sqlpeek/libsdh.so".into(),
        separator: None,
    }
}

/// Session over a running scripted process with hooks in place
pub fn session() -> Session<ScriptedDebugger> {
    let mut session = Session::new(ScriptedDebugger::new(), &config());
    session
        .install_hooks()
        .expect("scripted process has every SQLite symbol");
    session
}

/// Session whose tracker holds `Direct(DB)`
pub fn session_with_handle() -> Session<ScriptedDebugger> {
    let mut session = session();
    session.control_mut().hit("sqlite3_prepare_v2", &[DB]);
    session
}
