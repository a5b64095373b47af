//! Durable registry of server configurations and process handles.
//!
//! The registry keeps two JSON documents under the manager home:
//!
//! * `servers.json` - a [`ServerDocument`] with one [`ServerConfig`] per server
//! * `processes.json` - a [`ProcessDocument`] with one [`ProcessHandle`] per
//!   process that was observed running
//!
//! Reads go through a snapshot cache with a short time-to-live so a burst of
//! calls parses each document once. Every mutation re-reads the document from
//! disk, writes it back atomically, and drops the cached snapshot before
//! returning.
//!
//! There is no cross-process locking: two tool invocations that mutate the
//! same document at the same moment race, and the last writer wins.
//!
//! # Example
//!
//! ```no_run
//! use mcp_manager::config::{ManagerConfig, ServerConfig};
//! use mcp_manager::registry::RegistryStore;
//!
//! let store = RegistryStore::from_config(&ManagerConfig::from_env());
//! store.add_server(ServerConfig::new("echo", "python").with_args(["echo.py"]))?;
//! let snapshot = store.load()?;
//! assert!(snapshot.servers.contains_key("echo"));
//! # Ok::<(), mcp_manager::Error>(())
//! ```
mod document;

pub use document::{ProcessDocument, ServerDocument, SCHEMA_VERSION};

use crate::config::{validate_server_config, ManagerConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::server::ProcessHandle;
use chrono::Utc;
use document::{read_document, write_document};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A point-in-time view of both registry documents.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Server name to configuration.
    pub servers: BTreeMap<String, ServerConfig>,
    /// Server name to process handle.
    pub processes: BTreeMap<String, ProcessHandle>,
}

struct CachedSnapshot {
    loaded_at: Instant,
    snapshot: Arc<RegistrySnapshot>,
}

/// File-backed registry with a time-limited read cache.
///
/// One store is constructed per tool invocation; the cache is private to it.
pub struct RegistryStore {
    servers_path: PathBuf,
    processes_path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl RegistryStore {
    /// Create a store over explicit document paths.
    pub fn new(servers_path: impl Into<PathBuf>, processes_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            servers_path: servers_path.into(),
            processes_path: processes_path.into(),
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Create a store for the documents under the manager home.
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(config.servers_path(), config.processes_path(), config.cache_ttl())
    }

    /// Path of the server configuration document.
    pub fn servers_path(&self) -> &Path {
        &self.servers_path
    }

    /// Path of the process handle document.
    pub fn processes_path(&self) -> &Path {
        &self.processes_path
    }

    /// Load both documents, reusing a cached snapshot younger than the TTL.
    pub fn load(&self) -> Result<Arc<RegistrySnapshot>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Other("Failed to lock registry cache".to_string()))?;

        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                tracing::trace!("Using cached registry snapshot");
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        tracing::debug!(
            servers = %self.servers_path.display(),
            processes = %self.processes_path.display(),
            "Loading registry documents"
        );
        let servers: ServerDocument = read_document(&self.servers_path)?;
        let processes: ProcessDocument = read_document(&self.processes_path)?;
        let snapshot = Arc::new(RegistrySnapshot {
            servers: servers.servers,
            processes: processes.processes,
        });

        *cache = Some(CachedSnapshot {
            loaded_at: Instant::now(),
            snapshot: Arc::clone(&snapshot),
        });

        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next read hits the disk.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Look up a server configuration.
    pub fn find_server(&self, name: &str) -> Result<Option<ServerConfig>> {
        Ok(self.load()?.servers.get(name).cloned())
    }

    /// Get a server configuration, failing with `ServerNotFound` if absent.
    pub fn get_server(&self, name: &str) -> Result<ServerConfig> {
        self.find_server(name)?
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))
    }

    /// Register a new server.
    ///
    /// Fails with `DuplicateName` if a server with this name exists.
    #[tracing::instrument(skip(self, config), fields(server = %config.name))]
    pub fn add_server(&self, config: ServerConfig) -> Result<()> {
        validate_server_config(&config)?;

        self.mutate_servers(|servers| {
            if servers.contains_key(&config.name) {
                return Err(Error::DuplicateName(config.name.clone()));
            }
            servers.insert(config.name.clone(), config);
            Ok(())
        })?;

        tracing::info!("Server registered");
        Ok(())
    }

    /// Replace an existing server configuration.
    ///
    /// The creation timestamp of the stored record is kept and the update
    /// timestamp is set to now. Fails with `ServerNotFound` if absent.
    #[tracing::instrument(skip(self, config), fields(server = %config.name))]
    pub fn update_server(&self, mut config: ServerConfig) -> Result<ServerConfig> {
        let updated = self.mutate_servers(|servers| {
            let existing = servers
                .get(&config.name)
                .ok_or_else(|| Error::ServerNotFound(config.name.clone()))?;
            config.created_at = existing.created_at;
            config.updated_at = Utc::now().max(existing.created_at);
            validate_server_config(&config)?;
            servers.insert(config.name.clone(), config.clone());
            Ok(config)
        })?;

        tracing::info!("Server configuration updated");
        Ok(updated)
    }

    /// Remove a server configuration, returning the removed record.
    #[tracing::instrument(skip(self))]
    pub fn remove_server(&self, name: &str) -> Result<ServerConfig> {
        let removed = self.mutate_servers(|servers| {
            servers
                .remove(name)
                .ok_or_else(|| Error::ServerNotFound(name.to_string()))
        })?;

        tracing::info!(server = %name, "Server removed from registry");
        Ok(removed)
    }

    /// Look up the recorded process handle of a server.
    ///
    /// The handle is returned as persisted; callers that need to know whether
    /// the process is still alive go through the reconciler.
    pub fn get_process(&self, name: &str) -> Result<Option<ProcessHandle>> {
        Ok(self.load()?.processes.get(name).cloned())
    }

    /// Record the handle of a freshly spawned process, replacing any previous one.
    #[tracing::instrument(skip(self, handle), fields(server = %handle.name, pid = handle.pid))]
    pub fn put_process(&self, handle: ProcessHandle) -> Result<()> {
        self.mutate_processes(|processes| {
            processes.insert(handle.name.clone(), handle);
            Ok(())
        })
    }

    /// Remove the process handle of a server, returning it.
    ///
    /// Fails with `HandleNotFound` if no handle is recorded.
    #[tracing::instrument(skip(self))]
    pub fn remove_process(&self, name: &str) -> Result<ProcessHandle> {
        self.mutate_processes(|processes| {
            processes
                .remove(name)
                .ok_or_else(|| Error::HandleNotFound(name.to_string()))
        })
    }

    /// Remove the process handle of a server only if it still records `pid`.
    ///
    /// Returns whether a handle was removed. A handle rewritten by another
    /// invocation since it was read is left in place.
    #[tracing::instrument(skip(self))]
    pub fn remove_process_if_pid(&self, name: &str, pid: u32) -> Result<bool> {
        let current: ProcessDocument = read_document(&self.processes_path)?;
        if current.processes.get(name).map(|handle| handle.pid) != Some(pid) {
            self.invalidate();
            return Ok(false);
        }

        self.mutate_processes(|processes| {
            let matches = processes.get(name).map(|handle| handle.pid) == Some(pid);
            if matches {
                processes.remove(name);
            }
            Ok(matches)
        })
    }

    /// Remove every process handle whose process is no longer alive.
    ///
    /// `is_alive` is asked once per recorded handle. Returns the names of the
    /// servers whose handles were removed.
    #[tracing::instrument(skip(self, is_alive))]
    pub fn reconcile_stale_processes<F>(&self, is_alive: F) -> Result<Vec<String>>
    where
        F: Fn(&ProcessHandle) -> bool,
    {
        let current: ProcessDocument = read_document(&self.processes_path)?;
        let stale: Vec<String> = current
            .processes
            .values()
            .filter(|handle| !is_alive(handle))
            .map(|handle| handle.name.clone())
            .collect();

        // A clean document is left untouched
        if stale.is_empty() {
            self.invalidate();
            return Ok(stale);
        }

        let removed = self.mutate_processes(|processes| {
            Ok(stale
                .into_iter()
                .filter(|name| processes.remove(name).is_some())
                .collect::<Vec<_>>())
        })?;

        if !removed.is_empty() {
            tracing::info!(removed = ?removed, "Removed stale process handles");
        }
        Ok(removed)
    }

    fn mutate_servers<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, ServerConfig>) -> Result<T>,
    ) -> Result<T> {
        let mut document: ServerDocument = read_document(&self.servers_path)?;
        let result = f(&mut document.servers)?;
        document.schema_version = SCHEMA_VERSION;
        document.last_updated = Utc::now();
        write_document(&self.servers_path, &document)?;
        self.invalidate();
        Ok(result)
    }

    fn mutate_processes<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, ProcessHandle>) -> Result<T>,
    ) -> Result<T> {
        let mut document: ProcessDocument = read_document(&self.processes_path)?;
        let result = f(&mut document.processes)?;
        document.last_updated = Utc::now();
        write_document(&self.processes_path, &document)?;
        self.invalidate();
        Ok(result)
    }
}
