use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::ProcessHandle;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Current version of the server document layout.
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk document holding every server configuration.
///
/// ```json
/// {
///   "schema_version": 1,
///   "last_updated": "2024-05-01T10:00:00Z",
///   "servers": { "echo": { "name": "echo", "command": "python", ... } }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDocument {
    /// Layout version, for upgrades.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// When the document was last written.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Server name to configuration.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for ServerDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_updated: Utc::now(),
            servers: BTreeMap::new(),
        }
    }
}

/// On-disk document holding the handles of processes observed running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDocument {
    /// When the document was last written.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Server name to process handle.
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessHandle>,
}

impl Default for ProcessDocument {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            processes: BTreeMap::new(),
        }
    }
}

/// Reads a JSON document, treating a missing file as an empty document.
pub(crate) fn read_document<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => {
            return Err(Error::Registry(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content)
        .map_err(|e| Error::Registry(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Writes a JSON document with the write-then-rename pattern.
///
/// The temporary file lives next to the target so the rename never crosses
/// filesystems, and carries a random suffix so two invocations writing at
/// once never share a temporary file. Readers observe either the old or the
/// new document, never a partial one.
pub(crate) fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(document)
        .map_err(|e| Error::Serialization(format!("Failed to serialize {}: {}", path.display(), e)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Registry(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry".to_string());
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.write_all(b"\n")?;
        // Data must hit the disk before the rename makes it visible
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Registry(format!(
            "Failed to write {}: {}",
            path.display(),
            e
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc: ServerDocument = read_document(&dir.path().join("servers.json")).unwrap();
        assert_eq!(doc.schema_version, SCHEMA_VERSION);
        assert!(doc.servers.is_empty());
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("processes.json");

        write_document(&path, &ProcessDocument::default()).unwrap();

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["processes.json".to_string()]);
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        fs::write(&path, "{ not json").unwrap();

        let result: Result<ServerDocument> = read_document(&path);
        assert!(matches!(result, Err(Error::Registry(_))));
    }
}
