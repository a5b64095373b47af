/// Server process management for MCP Manager.
///
/// This module starts, stops and watches server processes. It is built
/// around one rule: a recorded process handle is only believed after the OS
/// confirms its process is alive. Every read goes through the
/// [`Reconciler`], which evicts handles of processes that died behind the
/// manager's back. All public operations are instrumented with `tracing`
/// spans.
///
/// # Components
///
/// * `os` - OS process table queries and signal delivery
/// * `process` - Process handles, status, and spawning
/// * `reconcile` - Validation and eviction of recorded handles
/// * `lifecycle` - Start, stop, restart and kill, with an event history
/// * `monitor` - Periodic health ticks as a stream
/// * `shutdown` - Cleanup of tracked children on interrupt
///
/// # Examples
///
/// ```no_run
/// use mcp_manager::server::{ServerLifecycleEvent, StartOptions};
/// use mcp_manager::{McpManager, ManagerConfig};
///
/// # async fn run() -> mcp_manager::Result<()> {
/// let manager = McpManager::new(ManagerConfig::from_env())?;
/// let handle = manager.start("fetch", StartOptions::default()).await?;
/// println!("fetch runs as pid {}", handle.pid);
///
/// let events = manager.events().server_events("fetch", Some(1))?;
/// assert_eq!(events[0].event, ServerLifecycleEvent::Started);
/// # Ok(())
/// # }
/// ```
pub mod lifecycle;
pub mod monitor;
pub mod os;
mod process;
pub mod reconcile;
pub mod shutdown;

pub use lifecycle::{LifecycleLog, ServerEvent, ServerLifecycleEvent, StartOptions, Supervisor};
pub use monitor::{MonitorOptions, MonitorTick, ServerTick, TickOutcome, TickReport};
pub use os::{ProcessInspector, SystemInspector};
pub use process::{ChildTable, ProcessHandle, ProcessStatus, ServerState};
pub use reconcile::{HandleCheck, Reconciler};
pub use shutdown::install_shutdown_hook;
