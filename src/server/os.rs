//! Operating-system queries and signals for managed processes.
//!
//! Everything the manager asks the OS about a process id goes through the
//! [`ProcessInspector`] trait, so tests can substitute a fake process table.
//! Signals are delivered to the process group first (servers are spawned as
//! group leaders) and fall back to the single process.
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use sysinfo::System;

use crate::error::{Error, Result};

/// Read-only view of the OS process table.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Whether the process exists and has not exited.
    ///
    /// Zombies (exited but not yet reaped) count as dead.
    fn is_alive(&self, pid: u32) -> bool;

    /// Resident memory of the process in bytes.
    async fn memory_bytes(&self, pid: u32) -> Option<u64>;

    /// CPU utilisation of the process, in percent of one core, sampled over `window`.
    async fn cpu_percent(&self, pid: u32, window: Duration) -> Option<f64>;
}

/// [`ProcessInspector`] backed by `kill(pid, 0)` and `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl SystemInspector {
    /// Create a new inspector
    pub fn new() -> Self {
        Self
    }

    fn is_zombie(pid: u32) -> bool {
        let mut system = System::new();
        let pid = sysinfo::Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return false;
        }
        system
            .process(pid)
            .map(|process| process.status() == sysinfo::ProcessStatus::Zombie)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ProcessInspector for SystemInspector {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(nix_pid) = to_nix_pid(pid) else {
            return false;
        };

        match signal::kill(nix_pid, None) {
            Ok(()) => !Self::is_zombie(pid),
            // Exists but belongs to another user
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    async fn memory_bytes(&self, pid: u32) -> Option<u64> {
        let mut system = System::new();
        let pid = sysinfo::Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }

    async fn cpu_percent(&self, pid: u32, window: Duration) -> Option<f64> {
        let mut system = System::new();
        let pid = sysinfo::Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return None;
        }

        // Usage is computed from the delta between two refreshes
        tokio::time::sleep(window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;

        if !system.refresh_process(pid) {
            return None;
        }
        system
            .process(pid)
            .map(|process| f64::from(process.cpu_usage()))
    }
}

/// Converts a stored pid into a signal target.
///
/// Rejects 0 and 1 (signalling them would hit the caller's group or init)
/// and values that do not fit the platform's `pid_t`.
pub(crate) fn to_nix_pid(pid: u32) -> Option<Pid> {
    if pid <= 1 || pid > i32::MAX as u32 {
        return None;
    }
    Some(Pid::from_raw(pid as i32))
}

/// Send a signal to the process group led by `pid`, falling back to the process.
///
/// Returns `Ok(false)` if the process no longer exists.
pub(crate) fn send_signal(pid: u32, sig: Signal) -> Result<bool> {
    let nix_pid = to_nix_pid(pid)
        .ok_or_else(|| Error::Process(format!("Refusing to signal invalid pid {}", pid)))?;

    match killpg(nix_pid, sig).or_else(|_| signal::kill(nix_pid, sig)) {
        Ok(()) => {
            tracing::debug!(pid, signal = ?sig, "Signal delivered");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            tracing::debug!(pid, signal = ?sig, "Process already gone");
            Ok(false)
        }
        Err(e) => Err(Error::Process(format!(
            "Failed to send {:?} to pid {}: {}",
            sig, pid, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let inspector = SystemInspector::new();
        assert!(inspector.is_alive(std::process::id()));
    }

    #[test]
    fn test_reserved_pids_are_rejected() {
        assert!(to_nix_pid(0).is_none());
        assert!(to_nix_pid(1).is_none());
        assert!(to_nix_pid(u32::MAX).is_none());
        assert!(!SystemInspector::new().is_alive(0));
    }

    #[tokio::test]
    async fn test_memory_of_current_process_is_reported() {
        let inspector = SystemInspector::new();
        let bytes = inspector.memory_bytes(std::process::id()).await;
        assert!(bytes.unwrap_or(0) > 0);
    }
}
