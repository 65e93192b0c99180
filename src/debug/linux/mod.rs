//! Linux x86_64 debugger implementation using ptrace.
//!
//! Only the thread that was launched or attached is traced. Threads created
//! by the target later run untraced and must not reach a breakpoint.

mod breakpoints;
pub mod process;
pub mod symbols;

pub use process::enumerate_processes;

use std::cell::Cell;
use std::rc::Rc;

use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::core::memory::MemoryManager;
use crate::core::{
    BreakpointId, BreakpointInfo, CallArg, DebugControl, DebugError, EntryCallback, EntryFrame,
    InferiorCall, LifecycleEvent, StopReason,
};
use crate::debug::types::DebugStatus;

use breakpoints::{BreakpointTable, INT3};
use symbols::SymbolResolver;

/// Bytes below the stack pointer the interrupted code may still be using
const RED_ZONE: u64 = 128;

/// Integer argument registers of the System V calling convention
const ARG_REGISTERS: usize = 6;

/// Called by the dynamic loader each time the set of loaded objects changes
const LOADER_HOOK: &str = "_dl_debug_state";

fn os_error(e: nix::Error) -> DebugError {
    DebugError::EventError(e.to_string())
}

/// Arguments of a thread halted on a function's first instruction
struct RegisterFrame<'a> {
    regs: &'a user_regs_struct,
    memory: &'a MemoryManager,
}

impl EntryFrame for RegisterFrame<'_> {
    fn argument(&self, index: usize) -> Result<u64, DebugError> {
        let regs = self.regs;
        match index {
            0 => Ok(regs.rdi),
            1 => Ok(regs.rsi),
            2 => Ok(regs.rdx),
            3 => Ok(regs.rcx),
            4 => Ok(regs.r8),
            5 => Ok(regs.r9),
            // [rsp] holds the return address; stack arguments follow it
            n => Ok(self.memory.read_u64(regs.rsp + 8 * (n as u64 - 5))?),
        }
    }

    fn read_pointer(&self, address: u64) -> Result<u64, DebugError> {
        Ok(self.memory.read_u64(address)?)
    }
}

/// Outcome of waiting on the tracee
enum Trap {
    Breakpoint(u64),
    Signal(Signal),
    Exited(Option<i32>),
}

/// ptrace debugger backend
pub struct PtraceDebugger {
    pid: Option<Pid>,
    /// Whether we started the process (killed on drop) or attached to it
    launched: bool,
    status: DebugStatus,
    memory: MemoryManager,
    symbols: SymbolResolver,
    breakpoints: BreakpointTable,
    /// Signal to deliver on the next continue
    pending_signal: Option<Signal>,
    /// Lifecycle events not yet handed out
    events: Vec<LifecycleEvent>,
    /// Set by the loader hook breakpoint
    code_loaded: Rc<Cell<bool>>,
}

impl PtraceDebugger {
    /// Create a new debugger instance
    pub fn new() -> Self {
        Self {
            pid: None,
            launched: false,
            status: DebugStatus::Detached,
            memory: MemoryManager::new(),
            symbols: SymbolResolver::new(),
            breakpoints: BreakpointTable::new(),
            pending_signal: None,
            events: Vec::new(),
            code_loaded: Rc::new(Cell::new(false)),
        }
    }

    pub fn status(&self) -> DebugStatus {
        self.status
    }

    /// Get the traced process ID
    pub fn attached_pid(&self) -> Option<u32> {
        self.pid.map(|pid| pid.as_raw() as u32)
    }

    fn require_pid(&self) -> Result<Pid, DebugError> {
        self.pid.ok_or(DebugError::NotRunning)
    }

    /// Start `program` and stop once it reaches its entry point, when the
    /// dynamic loader has mapped its libraries.
    ///
    /// A process already being debugged is killed first. Its exit event is
    /// queued before anything can fail, so it is delivered even when the
    /// new program does not start.
    pub fn launch(&mut self, program: &str, args: &[String]) -> Result<Vec<LifecycleEvent>, DebugError> {
        if let Some(pid) = self.pid {
            process::kill(pid);
            self.on_process_gone(None);
        }

        log::info!("Launching {} {:?}", program, args);
        let pid = process::spawn_traced(program, args)?;
        self.begin(pid, true);

        if let Err(e) = self.run_to_entry(pid) {
            process::kill(pid);
            self.on_process_gone(None);
            return Err(DebugError::LaunchFailed {
                program: program.to_string(),
                reason: e.to_string(),
            });
        }

        self.watch_loader();
        self.resolve_user_breakpoints(pid);
        self.events.push(LifecycleEvent::NewCodeLoaded);
        self.events.push(LifecycleEvent::Stopped(StopReason::Entry));
        Ok(self.take_events())
    }

    /// Attach to an existing process by PID, detaching from the current one
    pub fn attach(&mut self, pid: u32) -> Result<Vec<LifecycleEvent>, DebugError> {
        if self.pid.is_some() {
            self.release()?;
        }

        log::info!("Attaching to process {}", pid);
        let target = process::attach(pid)?;
        self.begin(target, false);
        self.watch_loader();
        self.resolve_user_breakpoints(target);

        log::info!("Successfully attached to process {}", pid);
        self.events.push(LifecycleEvent::NewCodeLoaded);
        self.events.push(LifecycleEvent::Stopped(StopReason::Attached));
        Ok(self.take_events())
    }

    fn begin(&mut self, pid: Pid, launched: bool) {
        self.pid = Some(pid);
        self.launched = launched;
        self.status = DebugStatus::Stopped;
        self.pending_signal = None;
        self.code_loaded.set(false);
        self.memory.open_process(pid.as_raw() as u32);
        self.symbols.clear();
    }

    /// Detach from the current process, removing every breakpoint first
    pub fn detach(&mut self) -> Result<Vec<LifecycleEvent>, DebugError> {
        self.release()?;
        Ok(self.take_events())
    }

    fn release(&mut self) -> Result<(), DebugError> {
        let pid = self.require_pid()?;
        log::info!("Detaching from process {}", pid);

        self.breakpoints.disarm_all(&self.memory);
        let result = process::detach(pid);
        self.on_process_gone(None);
        self.status = DebugStatus::Detached;
        result?;

        log::info!("Successfully detached from process {}", pid);
        Ok(())
    }

    pub fn kill(&mut self) -> Result<Vec<LifecycleEvent>, DebugError> {
        let pid = self.require_pid()?;
        process::kill(pid);
        self.on_process_gone(None);
        Ok(self.take_events())
    }

    /// Forget the process and queue its exit event
    fn on_process_gone(&mut self, code: Option<i32>) {
        self.pid = None;
        self.launched = false;
        self.status = DebugStatus::Exited;
        self.pending_signal = None;
        self.memory.close_process();
        self.breakpoints.forget_process();
        self.events.push(LifecycleEvent::Exited { code });
    }

    /// Break in the loader's hook so libraries mapped by `dlopen` are seen
    /// before any of their code runs. Static executables have no hook.
    fn watch_loader(&mut self) {
        let loaded = Rc::clone(&self.code_loaded);
        let callback: EntryCallback = Box::new(move |_: &dyn EntryFrame| {
            loaded.set(true);
            false
        });
        match self.set_entry_breakpoint(LOADER_HOOK, callback) {
            Ok(id) => log::debug!("Watching library loads (breakpoint {})", id),
            Err(e) => log::debug!("Library loads not watched: {}", e),
        }
    }

    /// After a hit on the loader hook: place pending user breakpoints and
    /// queue `NewCodeLoaded`. Returns whether the hook had fired.
    fn check_code_loaded(&mut self, pid: Pid) -> bool {
        if !self.code_loaded.replace(false) {
            return false;
        }
        log::debug!("Loaded objects changed");
        self.resolve_user_breakpoints(pid);
        self.events.push(LifecycleEvent::NewCodeLoaded);
        true
    }

    /// Set a user breakpoint; it stays pending while no process is running
    pub fn set_user_breakpoint(&mut self, symbol: &str) -> Result<BreakpointId, DebugError> {
        let address = match self.pid {
            Some(pid) => Some(self.symbols.lookup(pid.as_raw() as u32, symbol)?),
            None => None,
        };
        let id = self.breakpoints.insert(symbol, address, None);
        if let Some(address) = address {
            self.breakpoints.sync_site(&self.memory, address)?;
        }
        log::debug!("Breakpoint {} at {} ({:?})", id, symbol, address);
        Ok(id)
    }

    fn resolve_user_breakpoints(&mut self, pid: Pid) {
        let pid = pid.as_raw() as u32;
        let mut resolved = Vec::new();
        for bp in self.breakpoints.iter_mut() {
            if bp.address.is_some() {
                continue;
            }
            match self.symbols.lookup(pid, &bp.symbol) {
                Ok(address) => {
                    bp.address = Some(address);
                    resolved.push(address);
                }
                Err(e) => log::warn!("Breakpoint {} stays pending: {}", bp.id, e),
            }
        }
        for address in resolved {
            if let Err(e) = self.breakpoints.sync_site(&self.memory, address) {
                log::warn!("Failed to arm breakpoint at {:#x}: {}", address, e);
            }
        }
    }

    fn run_to_entry(&mut self, pid: Pid) -> Result<(), DebugError> {
        let entry = self.symbols.entry_point(pid.as_raw() as u32)?;
        let original = self.memory.read_u8(entry)?;
        self.memory.write(entry, &[INT3])?;

        ptrace::cont(pid, None).map_err(os_error)?;
        match waitpid(pid, None).map_err(os_error)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                self.memory.write(entry, &[original])?;
                let mut regs = ptrace::getregs(pid).map_err(os_error)?;
                regs.rip = entry;
                ptrace::setregs(pid, regs).map_err(os_error)?;
                Ok(())
            }
            other => Err(DebugError::EventError(format!(
                "did not reach entry point {:#x}: {:?}",
                entry, other
            ))),
        }
    }

    fn wait(&mut self, pid: Pid) -> Result<Trap, DebugError> {
        match waitpid(pid, None).map_err(os_error)? {
            WaitStatus::Exited(_, code) => Ok(Trap::Exited(Some(code))),
            WaitStatus::Signaled(_, signal, _) => {
                log::info!("Process {} killed by {}", pid, signal);
                Ok(Trap::Exited(None))
            }
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                let regs = ptrace::getregs(pid).map_err(os_error)?;
                let address = regs.rip.wrapping_sub(1);
                if self.breakpoints.is_armed(address) {
                    Ok(Trap::Breakpoint(address))
                } else {
                    Ok(Trap::Signal(Signal::SIGTRAP))
                }
            }
            WaitStatus::Stopped(_, signal) => Ok(Trap::Signal(signal)),
            other => Err(DebugError::EventError(format!("unexpected wait status {:?}", other))),
        }
    }

    /// If halted on an armed address, execute the original instruction with
    /// the `int3` lifted. Returns the exit code if the process ended.
    fn step_over_breakpoint(&mut self, pid: Pid) -> Result<Option<Option<i32>>, DebugError> {
        let rip = ptrace::getregs(pid).map_err(os_error)?.rip;
        let Some(original) = self.breakpoints.original_byte(rip) else {
            return Ok(None);
        };

        self.memory.write(rip, &[original])?;
        ptrace::step(pid, None).map_err(os_error)?;
        match waitpid(pid, None).map_err(os_error)? {
            WaitStatus::Exited(_, code) => return Ok(Some(Some(code))),
            WaitStatus::Signaled(_, _, _) => return Ok(Some(None)),
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            WaitStatus::Stopped(_, signal) => self.pending_signal = Some(signal),
            other => log::debug!("Unexpected status while stepping: {:?}", other),
        }
        self.memory.write(rip, &[INT3])?;
        Ok(None)
    }

    /// Hit on an armed address: run internal callbacks and decide whether
    /// to stop. The thread is rewound onto the breakpoint address.
    fn on_breakpoint(&mut self, pid: Pid, address: u64) -> Result<Option<StopReason>, DebugError> {
        let mut regs = ptrace::getregs(pid).map_err(os_error)?;
        regs.rip = address;
        ptrace::setregs(pid, regs).map_err(os_error)?;

        let frame = RegisterFrame {
            regs: &regs,
            memory: &self.memory,
        };
        let mut stop = None;
        for bp in self.breakpoints.iter_mut() {
            if !bp.enabled || bp.address != Some(address) {
                continue;
            }
            bp.hit_count += 1;
            let wants_stop = match bp.callback.as_mut() {
                Some(callback) => callback(&frame),
                None => true,
            };
            if wants_stop && stop.is_none() {
                stop = Some(StopReason::Breakpoint {
                    id: bp.id,
                    location: bp.symbol.clone(),
                });
            }
        }
        Ok(stop)
    }

    /// Continue until something the user should see happens, or until the
    /// loaded objects change. In the latter case the events end with
    /// `NewCodeLoaded` and the target is halted inside the loader.
    pub fn resume(&mut self) -> Result<Vec<LifecycleEvent>, DebugError> {
        let pid = self.require_pid()?;
        loop {
            if let Some(code) = self.step_over_breakpoint(pid)? {
                self.on_process_gone(code);
                return Ok(self.take_events());
            }

            let signal = self.pending_signal.take();
            ptrace::cont(pid, signal).map_err(os_error)?;

            match self.wait(pid)? {
                Trap::Exited(code) => {
                    self.on_process_gone(code);
                    return Ok(self.take_events());
                }
                Trap::Breakpoint(address) => {
                    let stop = self.on_breakpoint(pid, address)?;
                    let loaded = self.check_code_loaded(pid);
                    match stop {
                        Some(reason) => self.events.push(LifecycleEvent::Stopped(reason)),
                        None if !loaded => continue,
                        None => {}
                    }
                    self.status = DebugStatus::Stopped;
                    return Ok(self.take_events());
                }
                Trap::Signal(signal) => {
                    if !matches!(signal, Signal::SIGTRAP | Signal::SIGSTOP) {
                        self.pending_signal = Some(signal);
                    }
                    self.status = DebugStatus::Stopped;
                    self.events
                        .push(LifecycleEvent::Stopped(StopReason::Signal(signal.to_string())));
                    return Ok(self.take_events());
                }
            }
        }
    }

    fn call_function(&mut self, call: &InferiorCall) -> Result<u64, DebugError> {
        let pid = self.require_pid()?;
        let function = self.symbols.lookup(pid.as_raw() as u32, &call.function)?;
        let failed = |reason: String| DebugError::CallFailed {
            function: call.function.clone(),
            reason,
        };
        if call.args.len() > ARG_REGISTERS {
            return Err(failed(format!("more than {} arguments", ARG_REGISTERS)));
        }

        let saved = ptrace::getregs(pid).map_err(os_error)?;

        // Strings go below the red zone, each 16-byte aligned
        let mut sp = (saved.rsp - RED_ZONE) & !0xf;
        let mut words = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let word = match arg {
                CallArg::Str(text) => {
                    let mut bytes = text.as_bytes().to_vec();
                    bytes.push(0);
                    sp = (sp - bytes.len() as u64) & !0xf;
                    self.memory.write(sp, &bytes)?;
                    sp
                }
                CallArg::Pointer(value) => *value,
                CallArg::Int(value) => *value as u64,
            };
            words.push(word);
        }

        // Returning to address 0 faults, which marks completion
        sp -= 8;
        self.memory.write_u64(sp, 0)?;

        let mut regs = saved;
        regs.rsp = sp;
        regs.rip = function;
        regs.rax = 0;
        // Keep the kernel from restarting an interrupted syscall
        regs.orig_rax = u64::MAX;
        let slots = [
            &mut regs.rdi,
            &mut regs.rsi,
            &mut regs.rdx,
            &mut regs.rcx,
            &mut regs.r8,
            &mut regs.r9,
        ];
        for (slot, word) in slots.into_iter().zip(words) {
            *slot = word;
        }
        ptrace::setregs(pid, regs).map_err(os_error)?;

        log::debug!("Calling {} at {:#x}", call, function);
        let result = self.run_call(pid).map_err(failed);

        if self.pid.is_some() {
            if let Err(e) = ptrace::setregs(pid, saved) {
                log::warn!("Failed to restore registers after calling {}: {}", call.function, e);
            }
        }
        result
    }

    fn run_call(&mut self, pid: Pid) -> Result<u64, String> {
        loop {
            match self.step_over_breakpoint(pid) {
                Ok(None) => {}
                Ok(Some(code)) => {
                    self.on_process_gone(code);
                    return Err(format!("process exited ({:?})", code));
                }
                Err(e) => return Err(e.to_string()),
            }

            ptrace::cont(pid, None).map_err(|e| e.to_string())?;
            match self.wait(pid).map_err(|e| e.to_string())? {
                Trap::Signal(Signal::SIGSEGV) => {
                    let regs = ptrace::getregs(pid).map_err(|e| e.to_string())?;
                    if regs.rip == 0 {
                        return Ok(regs.rax);
                    }
                    return Err(format!("SIGSEGV at {:#x}", regs.rip));
                }
                Trap::Signal(signal) => return Err(format!("interrupted by {}", signal)),
                Trap::Breakpoint(address) => {
                    let stop = self.on_breakpoint(pid, address);
                    // A library loaded by the call itself
                    self.check_code_loaded(pid);
                    match stop {
                        Ok(None) => {}
                        Ok(Some(reason)) => return Err(format!("stopped at {}", reason)),
                        Err(e) => return Err(e.to_string()),
                    }
                }
                Trap::Exited(code) => {
                    self.on_process_gone(code);
                    return Err(format!("process exited ({:?})", code));
                }
            }
        }
    }
}

impl DebugControl for PtraceDebugger {
    fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    fn set_entry_breakpoint(
        &mut self,
        symbol: &str,
        callback: EntryCallback,
    ) -> Result<BreakpointId, DebugError> {
        let pid = self.require_pid()?;
        let address = self.symbols.lookup(pid.as_raw() as u32, symbol)?;
        let id = self.breakpoints.insert(symbol, Some(address), Some(callback));
        if let Err(e) = self.breakpoints.sync_site(&self.memory, address) {
            let _ = self.breakpoints.remove(id);
            return Err(e);
        }
        log::trace!("Internal breakpoint {} at {} ({:#x})", id, symbol, address);
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<(), DebugError> {
        let bp = self.breakpoints.remove(id)?;
        if let (Some(address), Some(_)) = (bp.address, self.pid) {
            self.breakpoints.sync_site(&self.memory, address)?;
        }
        Ok(())
    }

    fn breakpoints(&self) -> Vec<BreakpointInfo> {
        self.breakpoints.user_breakpoints()
    }

    fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<(), DebugError> {
        let bp = self.breakpoints.get_mut(id)?;
        bp.enabled = enabled;
        if let (Some(address), Some(_)) = (bp.address, self.pid) {
            self.breakpoints.sync_site(&self.memory, address)?;
        }
        Ok(())
    }

    fn call(&mut self, call: &InferiorCall) -> Result<u64, DebugError> {
        self.call_function(call)
    }

    fn read_pointer(&self, address: u64) -> Result<u64, DebugError> {
        Ok(self.memory.read_u64(address)?)
    }

    fn read_c_string(&self, address: u64) -> Result<Vec<u8>, DebugError> {
        Ok(self.memory.read_c_string(address)?)
    }

    fn take_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Default for PtraceDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PtraceDebugger {
    fn drop(&mut self) {
        let Some(pid) = self.pid else { return };
        if self.launched {
            process::kill(pid);
        } else {
            self.breakpoints.disarm_all(&self.memory);
            if let Err(e) = process::detach(pid) {
                log::warn!("{}", e);
            }
        }
    }
}
