//! Debug session context
//!
//! Owns the backend together with the state that lives as long as the debug
//! session: helper load flag, handle tracker and separator. Lifecycle events
//! are forwarded here by whoever drives the backend.

use crate::config::Config;
use crate::core::{DebugControl, DebugError, LifecycleEvent};
use crate::query::error::QueryError;
use crate::query::helper::HelperAttachment;
use crate::query::tracker::{HandleTracker, TrackedHandle};

pub const DEFAULT_SEPARATOR: &str = "|";

pub struct Session<D: DebugControl> {
    pub(crate) control: D,
    pub(crate) helper: HelperAttachment,
    pub(crate) tracker: HandleTracker,
    separator: Option<String>,
}

impl<D: DebugControl> Session<D> {
    pub fn new(control: D, config: &Config) -> Self {
        Self {
            control,
            helper: HelperAttachment::new(&config.helper_path),
            tracker: HandleTracker::new(),
            separator: config.separator.clone(),
        }
    }

    pub fn control(&self) -> &D {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut D {
        &mut self.control
    }

    pub fn helper(&self) -> &HelperAttachment {
        &self.helper
    }

    pub fn tracker(&self) -> &HandleTracker {
        &self.tracker
    }

    pub fn current_handle(&self) -> TrackedHandle {
        self.tracker.current_handle()
    }

    /// Separator handed to the helper, created with the default on first use
    pub fn separator(&mut self) -> &str {
        self.separator.get_or_insert_with(|| DEFAULT_SEPARATOR.to_string())
    }

    pub fn set_separator(&mut self, separator: impl Into<String>) {
        self.separator = Some(separator.into());
    }

    /// Place the tracker's breakpoints if they are not placed yet
    pub fn install_hooks(&mut self) -> Result<(), DebugError> {
        self.tracker.install(&mut self.control)
    }

    /// React to a process lifecycle event
    pub fn notify(&mut self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Stopped(_) | LifecycleEvent::NewCodeLoaded => {
                if let Err(e) = self.install_hooks() {
                    log::debug!("SQLite hooks not installed yet: {}", e);
                }
            }
            LifecycleEvent::Exited { code } => {
                log::info!("Target gone (exit code {:?}); resetting session state", code);
                self.forget_process();
            }
        }
    }

    /// Apply the events the backend queued outside of any command result.
    /// Returns them so the caller can show them.
    pub fn sync_events(&mut self) -> Vec<LifecycleEvent> {
        let events = self.control.take_events();
        for event in &events {
            self.notify(event);
        }
        events
    }

    /// Pass a query result through; if the process was lost on the way the
    /// helper flag and tracker go with it.
    pub(crate) fn settle<T>(&mut self, result: Result<T, QueryError>) -> Result<T, QueryError> {
        if !self.control.is_running() && (self.helper.is_loaded() || self.tracker.is_installed()) {
            log::info!("Target lost during a query; resetting session state");
            self.forget_process();
        }
        result
    }

    fn forget_process(&mut self) {
        self.helper.reset();
        self.tracker.reset();
    }
}
