use crate::error::{Error, Result};
use crate::registry::RegistryStore;
use crate::server::lifecycle::{LifecycleLog, ServerLifecycleEvent};
use crate::server::os::ProcessInspector;
use crate::server::process::{ChildTable, ProcessHandle};
use std::sync::Arc;

/// Outcome of validating a recorded process handle against the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleCheck {
    /// The recorded process is alive
    Live(ProcessHandle),
    /// The recorded process was dead; its handle has been evicted
    Evicted(ProcessHandle),
    /// No handle is recorded
    Absent,
}

impl HandleCheck {
    /// The live handle, if any
    pub fn into_live(self) -> Option<ProcessHandle> {
        match self {
            HandleCheck::Live(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Validates process handles on every read.
///
/// A handle whose process is gone is treated as absent and removed from the
/// registry on the spot. Removal failures are logged and never fail the read,
/// so a second check over the same dead process finds nothing to evict.
pub struct Reconciler {
    registry: Arc<RegistryStore>,
    inspector: Arc<dyn ProcessInspector>,
    children: ChildTable,
    events: Arc<LifecycleLog>,
}

impl Reconciler {
    /// Create a new reconciler
    pub fn new(
        registry: Arc<RegistryStore>,
        inspector: Arc<dyn ProcessInspector>,
        children: ChildTable,
        events: Arc<LifecycleLog>,
    ) -> Self {
        Self {
            registry,
            inspector,
            children,
            events,
        }
    }

    /// The inspector used for liveness checks
    pub fn inspector(&self) -> &Arc<dyn ProcessInspector> {
        &self.inspector
    }

    /// Whether the process behind a handle is alive.
    ///
    /// Children spawned by this invocation are polled directly, which also
    /// reaps them; anything else is looked up in the OS process table.
    pub fn is_alive(&self, handle: &ProcessHandle) -> bool {
        match self.children.poll_exit(&handle.name, handle.pid) {
            Some(exited) => !exited,
            None => self.inspector.is_alive(handle.pid),
        }
    }

    /// Read the handle of a server and validate it.
    pub fn check(&self, name: &str) -> Result<HandleCheck> {
        let Some(handle) = self.registry.get_process(name)? else {
            return Ok(HandleCheck::Absent);
        };

        if self.is_alive(&handle) {
            return Ok(HandleCheck::Live(handle));
        }

        tracing::info!(server = %name, pid = handle.pid, "Recorded process is gone, evicting handle");
        self.evict(&handle);
        Ok(HandleCheck::Evicted(handle))
    }

    /// The handle of a server if its process is alive.
    pub fn live_handle(&self, name: &str) -> Result<Option<ProcessHandle>> {
        Ok(self.check(name)?.into_live())
    }

    /// Evict every recorded handle whose process is gone.
    ///
    /// Returns the names of the evicted servers.
    pub fn reconcile_all(&self) -> Result<Vec<String>> {
        let removed = self
            .registry
            .reconcile_stale_processes(|handle| self.is_alive(handle))?;

        for name in &removed {
            self.children.remove(name);
            self.events.record(
                name,
                ServerLifecycleEvent::Evicted,
                None,
                Some("process not found during reconciliation".to_string()),
            );
        }
        Ok(removed)
    }

    /// Forget a handle whose process is confirmed gone.
    pub(crate) fn forget(&self, handle: &ProcessHandle) -> Result<()> {
        self.children.remove(&handle.name);
        match self.registry.remove_process_if_pid(&handle.name, handle.pid) {
            Ok(_) => Ok(()),
            Err(Error::HandleNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn evict(&self, handle: &ProcessHandle) {
        if let Err(e) = self.forget(handle) {
            tracing::warn!(server = %handle.name, pid = handle.pid, error = %e, "Failed to evict stale handle");
            return;
        }
        self.events.record(
            &handle.name,
            ServerLifecycleEvent::Evicted,
            Some(handle.pid),
            Some("process exited outside the supervisor".to_string()),
        );
    }
}
