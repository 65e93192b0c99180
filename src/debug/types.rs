//! Common types for the debugger backends.

use std::fmt;

/// Information about a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process ID
    pub pid: u32,
    /// Process name (executable name)
    pub name: String,
}

/// Debug session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugStatus {
    #[default]
    Detached,
    /// Halted and accepting commands
    Stopped,
    Exited,
}

impl fmt::Display for DebugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DebugStatus::Detached => "detached",
            DebugStatus::Stopped => "stopped",
            DebugStatus::Exited => "exited",
        };
        f.write_str(text)
    }
}

/// One line of `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub executable: bool,
    /// File offset of the first mapped byte
    pub offset: u64,
    /// Backing file, if any
    pub path: Option<String>,
}

impl MemoryMapping {
    /// Parse a maps line: `start-end perms offset dev inode [path]`
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let (start, _end) = fields.next()?.split_once('-')?;
        let perms = fields.next()?;
        let offset = fields.next()?;
        let _dev = fields.next()?;
        let _inode = fields.next()?;
        let path = fields.collect::<Vec<_>>().join(" ");

        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            executable: perms.as_bytes().get(2) == Some(&b'x'),
            offset: u64::from_str_radix(offset, 16).ok()?,
            path: path.starts_with('/').then_some(path),
        })
    }
}
