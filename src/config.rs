//! Runtime configuration

use std::path::PathBuf;

/// File name of the native helper library
pub const HELPER_FILE_NAME: &str = "libsdh.so";

#[derive(Debug, Clone)]
pub struct Config {
    /// Native helper library loaded into the target
    pub helper_path: PathBuf,
    /// Initial separator; `None` creates the default on first use
    pub separator: Option<String>,
}

impl Config {
    /// Helper next to the running executable, or in the working directory
    pub fn default_helper_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(HELPER_FILE_NAME)))
            .unwrap_or_else(|| PathBuf::from(HELPER_FILE_NAME))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            helper_path: Self::default_helper_path(),
            separator: None,
        }
    }
}
