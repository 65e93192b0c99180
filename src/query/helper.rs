//! Helper attachment
//!
//! Maps the native helper library into the target with `dlopen`, at most
//! once per process lifetime.

use std::path::{Path, PathBuf};

use crate::core::{DebugControl, InferiorCall};
use crate::query::error::QueryError;
use crate::query::guard::BreakpointGuard;

/// `RTLD_NOW | RTLD_GLOBAL`
pub const DLOPEN_FLAGS: i64 = 0x002 | 0x100;

/// Load state of the helper library in the current target process
#[derive(Debug)]
pub struct HelperAttachment {
    path: PathBuf,
    loaded: bool,
}

impl HelperAttachment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Load the helper unless it is already mapped in this process.
    pub fn ensure_loaded<D: DebugControl + ?Sized>(&mut self, control: &mut D) -> Result<(), QueryError> {
        if !control.is_running() {
            return Err(QueryError::NotRunning);
        }
        if self.loaded {
            return Ok(());
        }

        let path = self.path.to_string_lossy().into_owned();
        let call = InferiorCall::new("dlopen").str_arg(path).int_arg(DLOPEN_FLAGS);
        log::debug!("Loading helper: {}", call);

        let mut guard = BreakpointGuard::suspend(control)?;
        let handle = guard.call(&call).map_err(|e| self.load_error(e.to_string()))?;
        if handle == 0 {
            let reason = last_dl_error(&mut *guard).unwrap_or_else(|| "dlopen returned NULL".into());
            return Err(self.load_error(reason));
        }

        log::info!("Helper library loaded: {} ({:#x})", self.path.display(), handle);
        self.loaded = true;
        Ok(())
    }

    /// The process went away; the next query loads the helper again
    pub fn reset(&mut self) {
        self.loaded = false;
    }

    fn load_error(&self, reason: String) -> QueryError {
        QueryError::HelperLoad {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Message of the last failed `dlopen`, if the target can tell us
fn last_dl_error<D: DebugControl + ?Sized>(control: &mut D) -> Option<String> {
    let message = control.call(&InferiorCall::new("dlerror")).ok()?;
    if message == 0 {
        return None;
    }
    let bytes = control.read_c_string(message).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
