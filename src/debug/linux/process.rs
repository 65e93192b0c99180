//! Process control using ptrace and procfs.

use std::ffi::CString;
use std::fs;

use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};

use crate::core::DebugError;
use crate::debug::types::{MemoryMapping, ProcessInfo};

/// Enumerate all running processes
pub fn enumerate_processes() -> Vec<ProcessInfo> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut processes: Vec<ProcessInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| {
            let name = fs::read_to_string(format!("/proc/{}/comm", pid)).ok()?;
            Some(ProcessInfo {
                pid,
                name: name.trim_end().to_string(),
            })
        })
        .collect();

    // Sort by name
    processes.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    processes
}

/// Current memory map of a process
pub fn read_mappings(pid: u32) -> Result<Vec<MemoryMapping>, DebugError> {
    let maps = fs::read_to_string(format!("/proc/{}/maps", pid))
        .map_err(|e| DebugError::EventError(format!("cannot read maps of {}: {}", pid, e)))?;
    Ok(maps.lines().filter_map(MemoryMapping::parse).collect())
}

/// Path of the main executable
pub fn executable_path(pid: u32) -> Result<String, DebugError> {
    fs::read_link(format!("/proc/{}/exe", pid))
        .map(|path| path.to_string_lossy().into_owned())
        .map_err(|e| DebugError::EventError(format!("cannot resolve executable of {}: {}", pid, e)))
}

/// Start `program` stopped at its first instruction, traced by us
pub fn spawn_traced(program: &str, args: &[String]) -> Result<Pid, DebugError> {
    let launch_failed = |reason: String| DebugError::LaunchFailed {
        program: program.to_string(),
        reason,
    };

    let c_program = CString::new(program).map_err(|e| launch_failed(e.to_string()))?;
    let mut c_args = vec![c_program.clone()];
    for arg in args {
        c_args.push(CString::new(arg.as_str()).map_err(|e| launch_failed(e.to_string()))?);
    }

    // SAFETY: the child only calls async-signal-safe functions before exec
    match unsafe { fork() }.map_err(|e| launch_failed(e.to_string()))? {
        ForkResult::Child => {
            if ptrace::traceme().is_ok() {
                let _ = execvp(&c_program, &c_args);
            }
            // SAFETY: _exit is async-signal-safe and skips destructors of the parent image
            unsafe { nix::libc::_exit(127) }
        }
        ForkResult::Parent { child } => {
            match waitpid(child, None).map_err(|e| launch_failed(e.to_string()))? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
                WaitStatus::Exited(_, code) => {
                    return Err(launch_failed(format!("exited with code {} before exec", code)));
                }
                other => return Err(launch_failed(format!("unexpected status {:?}", other))),
            }
            ptrace::setoptions(child, ptrace::Options::PTRACE_O_EXITKILL)
                .map_err(|e| launch_failed(e.to_string()))?;
            Ok(child)
        }
    }
}

/// Attach to a running process and wait until it is stopped
pub fn attach(pid: u32) -> Result<Pid, DebugError> {
    let attach_failed = |reason: String| DebugError::AttachFailed { pid, reason };
    let target = Pid::from_raw(pid as i32);

    ptrace::attach(target).map_err(|e| attach_failed(e.to_string()))?;
    match waitpid(target, None).map_err(|e| attach_failed(e.to_string()))? {
        WaitStatus::Stopped(_, _) => Ok(target),
        other => Err(attach_failed(format!("unexpected status {:?}", other))),
    }
}

pub fn detach(pid: Pid) -> Result<(), DebugError> {
    ptrace::detach(pid, None).map_err(|e| DebugError::DetachFailed {
        pid: pid.as_raw() as u32,
        reason: e.to_string(),
    })
}

/// Kill a traced process and reap it
pub fn kill(pid: Pid) {
    if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
        log::debug!("kill({}) failed: {}", pid, e);
        return;
    }
    let _ = waitpid(pid, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_contains_self() {
        let me = std::process::id();
        assert!(enumerate_processes().iter().any(|p| p.pid == me));
    }

    #[test]
    fn test_own_mappings() {
        let mappings = read_mappings(std::process::id()).unwrap();
        let exe = executable_path(std::process::id()).unwrap();
        assert!(mappings.iter().any(|m| m.path.as_deref() == Some(exe.as_str())));
    }
}
