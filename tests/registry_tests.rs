use chrono::Utc;
use mcp_manager::config::ServerConfig;
use mcp_manager::error::{Error, Result};
use mcp_manager::registry::{ProcessDocument, RegistryStore, ServerDocument, SCHEMA_VERSION};
use mcp_manager::server::ProcessHandle;
use mcp_manager::transport::TransportMode;
use std::path::Path;
use std::time::Duration;

fn store(dir: &Path, ttl: Duration) -> RegistryStore {
    RegistryStore::new(dir.join("servers.json"), dir.join("processes.json"), ttl)
}

fn handle(name: &str, pid: u32) -> ProcessHandle {
    ProcessHandle {
        pid,
        name: name.to_string(),
        transport: TransportMode::Stdio,
        port: None,
        started_at: Utc::now(),
        command: vec!["sleep".to_string(), "30".to_string()],
        working_dir: "/tmp".into(),
        detached: false,
    }
}

#[test]
fn test_missing_documents_load_empty() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));

    let snapshot = registry.load()?;

    assert!(snapshot.servers.is_empty());
    assert!(snapshot.processes.is_empty());
    assert!(!registry.servers_path().exists());

    Ok(())
}

#[test]
fn test_config_round_trips_through_a_fresh_store() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new("web", "python")
        .with_args(["-m", "server", "--port", "{port}"])
        .with_transport(TransportMode::Network, Some(9999))
        .with_env("TOKEN", "secret");

    store(dir.path(), Duration::from_secs(30)).add_server(config.clone())?;

    let reloaded = store(dir.path(), Duration::from_secs(30)).get_server("web")?;
    assert_eq!(reloaded, config);

    let raw = std::fs::read_to_string(dir.path().join("servers.json")).unwrap();
    let document: ServerDocument = serde_json::from_str(&raw).unwrap();
    assert_eq!(document.schema_version, SCHEMA_VERSION);
    assert!(document.servers.contains_key("web"));

    Ok(())
}

#[test]
fn test_duplicate_and_missing_names() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));
    registry.add_server(ServerConfig::new("echo", "cat"))?;

    assert!(matches!(
        registry.add_server(ServerConfig::new("echo", "cat")),
        Err(Error::DuplicateName(name)) if name == "echo"
    ));
    assert!(matches!(
        registry.update_server(ServerConfig::new("ghost", "cat")),
        Err(Error::ServerNotFound(_))
    ));
    assert!(matches!(
        registry.remove_server("ghost"),
        Err(Error::ServerNotFound(_))
    ));
    assert!(matches!(
        registry.remove_process("echo"),
        Err(Error::HandleNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_update_keeps_creation_time() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));
    let original = ServerConfig::new("echo", "cat");
    registry.add_server(original.clone())?;

    let mut edited = ServerConfig::new("echo", "cat").with_args(["-u"]);
    edited.created_at = Utc::now() + chrono::Duration::days(1);
    let updated = registry.update_server(edited)?;

    assert_eq!(updated.created_at, original.created_at);
    assert!(updated.updated_at >= original.updated_at);
    assert_eq!(registry.get_server("echo")?.args, vec!["-u"]);

    Ok(())
}

#[test]
fn test_invalid_config_is_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));

    let result = registry.add_server(ServerConfig::new("../escape", "cat"));

    assert!(matches!(result, Err(Error::ConfigInvalid(_))));
    assert!(!registry.servers_path().exists());
}

#[test]
fn test_cache_hides_external_writes_until_invalidated() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let reader = store(dir.path(), Duration::from_secs(60));
    let writer = store(dir.path(), Duration::from_secs(60));

    assert!(reader.load()?.servers.is_empty());
    writer.add_server(ServerConfig::new("echo", "cat"))?;

    assert!(reader.find_server("echo")?.is_none());
    reader.invalidate();
    assert!(reader.find_server("echo")?.is_some());

    Ok(())
}

#[test]
fn test_cached_snapshot_expires_after_ttl() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let reader = store(dir.path(), Duration::from_millis(50));
    let writer = store(dir.path(), Duration::from_millis(50));

    assert!(reader.load()?.servers.is_empty());
    writer.add_server(ServerConfig::new("echo", "cat"))?;
    writer.put_process(handle("echo", 4242))?;

    std::thread::sleep(Duration::from_millis(80));

    assert!(reader.find_server("echo")?.is_some());
    assert_eq!(reader.get_process("echo")?.map(|h| h.pid), Some(4242));

    Ok(())
}

#[test]
fn test_mutations_refresh_the_cache() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(60));

    assert!(registry.load()?.servers.is_empty());
    registry.add_server(ServerConfig::new("echo", "cat"))?;

    assert!(registry.find_server("echo")?.is_some());

    Ok(())
}

#[test]
fn test_atomic_writes_leave_no_temp_files() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));

    for i in 0..5 {
        registry.add_server(ServerConfig::new(format!("server-{}", i), "cat"))?;
        registry.put_process(handle(&format!("server-{}", i), 1000 + i))?;
    }

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["processes.json", "servers.json"]);

    Ok(())
}

#[test]
fn test_corrupt_document_is_a_registry_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("servers.json"), "{ not json").unwrap();

    let result = store(dir.path(), Duration::from_secs(30)).load();

    assert!(matches!(result, Err(Error::Registry(_))));
}

#[test]
fn test_reconcile_removes_only_dead_handles_and_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));
    registry.put_process(handle("alive", 100))?;
    registry.put_process(handle("dead", 200))?;

    let removed = registry.reconcile_stale_processes(|h| h.pid == 100)?;
    assert_eq!(removed, vec!["dead"]);

    let again = registry.reconcile_stale_processes(|h| h.pid == 100)?;
    assert!(again.is_empty());

    let raw = std::fs::read_to_string(registry.processes_path()).unwrap();
    let document: ProcessDocument = serde_json::from_str(&raw).unwrap();
    assert_eq!(document.processes.keys().collect::<Vec<_>>(), vec!["alive"]);

    Ok(())
}

#[test]
fn test_conditional_handle_removal_checks_pid() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = store(dir.path(), Duration::from_secs(30));
    registry.put_process(handle("echo", 300))?;

    assert!(!registry.remove_process_if_pid("echo", 299)?);
    assert!(registry.get_process("echo")?.is_some());

    assert!(registry.remove_process_if_pid("echo", 300)?);
    assert!(registry.get_process("echo")?.is_none());
    assert!(!registry.remove_process_if_pid("echo", 300)?);

    Ok(())
}
