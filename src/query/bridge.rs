//! Query bridge
//!
//! Turns a statement into a call of the helper inside the target:
//!
//! - `sdh_exec(sql, db, sep) -> char*`
//! - `sdh_exec_at(sql, location, db, sep) -> char*`
//! - `sdh_exec_count(sql, db) -> int`
//!
//! Returned buffers are allocated by the helper on the target heap and are
//! released with `free` once copied out.

use std::io::Write;

use crate::core::call::decode_argument;
use crate::core::{DebugControl, DebugError, InferiorCall};
use crate::query::error::QueryError;
use crate::query::guard::BreakpointGuard;
use crate::query::session::Session;
use crate::query::tracker::TrackedHandle;

pub const EXEC_FN: &str = "sdh_exec";
pub const EXEC_AT_FN: &str = "sdh_exec_at";
pub const EXEC_COUNT_FN: &str = "sdh_exec_count";
pub const FREE_FN: &str = "free";

/// A helper-allocated buffer in the target heap, freed on drop
pub struct RemoteBuffer<'a, D: DebugControl + ?Sized> {
    control: &'a mut D,
    address: u64,
}

impl<'a, D: DebugControl + ?Sized> RemoteBuffer<'a, D> {
    pub fn new(control: &'a mut D, address: u64) -> Self {
        Self { control, address }
    }

    /// Copy the buffer out as text. The buffer is freed either way.
    pub fn into_text(self) -> Result<String, DebugError> {
        let bytes = self.control.read_c_string(self.address)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<D: DebugControl + ?Sized> Drop for RemoteBuffer<'_, D> {
    fn drop(&mut self) {
        let call = InferiorCall::new(FREE_FN).pointer_arg(self.address);
        if let Err(e) = self.control.call(&call) {
            log::warn!("Failed to free result buffer at {:#x}: {}", self.address, e);
        }
    }
}

/// Reject statements that are empty or only whitespace
pub fn validate_statement(sql: &str) -> Result<(), QueryError> {
    if sql.trim().is_empty() {
        return Err(QueryError::InvalidInput);
    }
    Ok(())
}

/// Handle value to pass to the helper
pub fn resolve_handle<D: DebugControl + ?Sized>(
    tracked: TrackedHandle,
    control: &D,
) -> Result<u64, QueryError> {
    let handle = match tracked {
        TrackedHandle::Direct(db) => db,
        TrackedHandle::Indirect(slot) => control.read_pointer(slot).map_err(QueryError::CallFailed)?,
        TrackedHandle::None => 0,
    };
    if handle == 0 {
        return Err(QueryError::HandleNotFound);
    }
    Ok(handle)
}

/// Run a call returning a helper buffer with user breakpoints suspended,
/// copy the buffer out and free it.
fn call_for_text<D: DebugControl + ?Sized>(control: &mut D, call: &InferiorCall) -> Result<String, QueryError> {
    log::debug!("Calling {}", call);
    let mut guard = BreakpointGuard::suspend(control)?;
    let address = guard.call(call).map_err(QueryError::CallFailed)?;
    if address == 0 {
        return Err(QueryError::CallFailed(DebugError::CallFailed {
            function: call.function.clone(),
            reason: "helper returned a NULL buffer".into(),
        }));
    }
    let text = RemoteBuffer::new(&mut *guard, address)
        .into_text()
        .map_err(QueryError::CallFailed)?;
    Ok(text)
}

impl<D: DebugControl> Session<D> {
    /// Helper loaded, hooks placed, and a live handle found
    fn prepare_call(&mut self) -> Result<u64, QueryError> {
        self.sync_events();
        self.helper.ensure_loaded(&mut self.control)?;
        if let Err(e) = self.install_hooks() {
            log::debug!("SQLite hooks not installed: {}", e);
        }
        resolve_handle(self.tracker.current_handle(), &self.control)
    }

    fn exec_text(&mut self, sql: &str) -> Result<String, QueryError> {
        validate_statement(sql)?;
        let db = self.prepare_call()?;
        let separator = self.separator().to_string();
        let call = InferiorCall::new(EXEC_FN)
            .str_arg(sql)
            .pointer_arg(db)
            .str_arg(separator);
        call_for_text(&mut self.control, &call)
    }

    /// Run a statement and print the formatted result.
    ///
    /// `statement` is raw SQL or a single double-quoted C string literal.
    pub fn execute_print(&mut self, statement: &str, out: &mut dyn Write) -> Result<(), QueryError> {
        let sql = decode_argument(statement).map_err(|_| QueryError::InvalidInput)?;
        let result = self.exec_text(&sql);
        let text = self.settle(result)?;
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Run a statement and return the formatted result
    pub fn execute_string(&mut self, sql: &str) -> Result<String, QueryError> {
        let result = self.exec_text(sql);
        self.settle(result)
    }

    /// Run a statement through `sdh_exec_at`, passing `location` through unchecked
    pub fn execute_at(&mut self, sql: &str, location: &str) -> Result<String, QueryError> {
        let result = self.exec_text_at(sql, location);
        self.settle(result)
    }

    fn exec_text_at(&mut self, sql: &str, location: &str) -> Result<String, QueryError> {
        validate_statement(sql)?;
        let db = self.prepare_call()?;
        let separator = self.separator().to_string();
        let call = InferiorCall::new(EXEC_AT_FN)
            .str_arg(sql)
            .str_arg(location)
            .pointer_arg(db)
            .str_arg(separator);
        call_for_text(&mut self.control, &call)
    }

    /// Number of result rows, or -1 on any failure
    pub fn execute_count(&mut self, sql: &str) -> i64 {
        let result = self.try_execute_count(sql);
        match self.settle(result) {
            Ok(count) => count,
            Err(QueryError::InvalidInput) => -1,
            Err(e) => {
                log::error!("{}", e);
                -1
            }
        }
    }

    fn try_execute_count(&mut self, sql: &str) -> Result<i64, QueryError> {
        validate_statement(sql)?;
        let db = self.prepare_call()?;
        let call = InferiorCall::new(EXEC_COUNT_FN).str_arg(sql).pointer_arg(db);
        log::debug!("Calling {}", call);

        let mut guard = BreakpointGuard::suspend(&mut self.control)?;
        let count = guard.call(&call).map_err(QueryError::CallFailed)?;
        // The helper returns a C int
        Ok(i64::from(count as u32 as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_statement() {
        assert!(validate_statement("select 1").is_ok());
        for blank in ["", "   ", "\t\n "] {
            assert!(matches!(validate_statement(blank), Err(QueryError::InvalidInput)));
        }
    }
}
