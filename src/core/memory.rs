//! Memory - Target process memory operations
//!
//! Reads and writes go through `/proc/<pid>/mem`, which a ptrace tracer may
//! access even for read-only mappings (breakpoint insertion relies on this).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use thiserror::Error;

const PAGE_SIZE: u64 = 4096;

/// Upper bound on a single C string read (result buffers included)
pub const MAX_STRING_LEN: usize = 64 * 1024 * 1024;

/// Errors accessing the traced process memory
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Failed to write memory at {address:#x}: {reason}")]
    WriteFailed { address: u64, reason: String },

    #[error("Short read at {address:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead { address: u64, wanted: usize, got: usize },

    #[error("String at {address:#x} exceeds {limit} bytes")]
    StringTooLong { address: u64, limit: usize },

    #[error("No process attached")]
    NoProcess,
}

/// Reads and writes the address space of the traced process
#[derive(Debug, Default)]
pub struct MemoryManager {
    target_pid: Option<u32>,
}

impl MemoryManager {
    /// Manager with no process attached
    pub fn new() -> Self {
        Self { target_pid: None }
    }

    /// Point the manager at a process
    pub fn open_process(&mut self, pid: u32) {
        self.target_pid = Some(pid);
    }

    pub fn close_process(&mut self) {
        self.target_pid = None;
    }

    fn mem_path(&self) -> Result<String, MemoryError> {
        let pid = self.target_pid.ok_or(MemoryError::NoProcess)?;
        Ok(format!("/proc/{}/mem", pid))
    }

    /// Read `size` bytes at `address`
    pub fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buffer = vec![0u8; size];
        let got = self.read_into(address, &mut buffer)?;
        if got != size {
            return Err(MemoryError::ShortRead {
                address,
                wanted: size,
                got,
            });
        }
        Ok(buffer)
    }

    /// Read memory into an existing buffer, returning the number of bytes read
    pub fn read_into(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        let read_failed = |e: std::io::Error| MemoryError::ReadFailed {
            address,
            reason: e.to_string(),
        };

        let mut file = File::open(self.mem_path()?).map_err(read_failed)?;
        file.seek(SeekFrom::Start(address)).map_err(read_failed)?;

        let mut total = 0;
        while total < buffer.len() {
            match file.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_failed(e)),
            }
        }
        Ok(total)
    }

    /// Write `data` at `address`
    pub fn write(&self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let write_failed = |e: std::io::Error| MemoryError::WriteFailed {
            address,
            reason: e.to_string(),
        };

        let mut file = OpenOptions::new()
            .write(true)
            .open(self.mem_path()?)
            .map_err(write_failed)?;
        file.seek(SeekFrom::Start(address)).map_err(write_failed)?;
        file.write_all(data).map_err(write_failed)
    }

    /// Read a NUL-terminated byte string.
    ///
    /// Reads page by page so a string ending just before an unmapped page
    /// is still returned.
    pub fn read_c_string(&self, address: u64) -> Result<Vec<u8>, MemoryError> {
        let mut text = Vec::new();
        let mut cursor = address;
        loop {
            let chunk_len = (PAGE_SIZE - cursor % PAGE_SIZE) as usize;
            let chunk = self.read(cursor, chunk_len)?;
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                text.extend_from_slice(&chunk[..nul]);
                return Ok(text);
            }
            text.extend_from_slice(&chunk);
            if text.len() > MAX_STRING_LEN {
                return Err(MemoryError::StringTooLong {
                    address,
                    limit: MAX_STRING_LEN,
                });
            }
            cursor += chunk_len as u64;
        }
    }

    /// Read a native-endian pointer-sized word at `address`
    pub fn read_u64(&self, address: u64) -> Result<u64, MemoryError> {
        let mut bytes = [0u8; 8];
        let got = self.read_into(address, &mut bytes)?;
        if got != bytes.len() {
            return Err(MemoryError::ShortRead {
                address,
                wanted: bytes.len(),
                got,
            });
        }
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        let data = self.read(address, 1)?;
        Ok(data[0])
    }

    pub fn write_u64(&self, address: u64, value: u64) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }
}
