//! Persisted registry of managed server entries.
//!
//! The registry is a single JSON document (`servers.json`). Every mutation is
//! a locked read-modify-write of the whole collection followed by an atomic
//! replace, so concurrent writers (including other processes) never observe
//! or produce a partial list.

use crate::config::AppConfig;
use crate::error::{HearthError, Result};
use crate::persist::{atomic_read_json, atomic_write_json, with_file_lock};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::info;
use uuid::Uuid;

const REGISTRY_VERSION: u32 = 1;

/// Opaque identifier of a managed entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn generate() -> Self {
        EntryId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        EntryId(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        EntryId(s)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered server directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedEntry {
    pub id: EntryId,
    pub name: String,
    pub path: PathBuf,
    /// Jar (or other launchable file) inside `path`.
    #[serde(rename = "coreJar", default)]
    pub artifact_name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    servers: Vec<ManagedEntry>,
}

/// File-backed store of [`ManagedEntry`] records.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, in insertion order.
    pub fn list(&self) -> Result<Vec<ManagedEntry>> {
        Ok(self.load()?.servers)
    }

    pub fn get(&self, id: &EntryId) -> Result<Option<ManagedEntry>> {
        Ok(self.list()?.into_iter().find(|e| &e.id == id))
    }

    /// Whether an entry already uses `path`.
    pub fn contains_path(&self, path: &Path) -> Result<bool> {
        let wanted = normalize_path(path);
        Ok(self
            .list()?
            .iter()
            .any(|e| normalize_path(&e.path) == wanted))
    }

    /// Register a new entry.
    ///
    /// Fails with [`HearthError::DuplicatePath`] if `path` is already
    /// registered; the stored document is left untouched in that case.
    pub fn add(&self, name: &str, path: &Path, artifact: &str) -> Result<ManagedEntry> {
        let path = normalize_path(path);
        self.modify(|servers| {
            if servers.iter().any(|e| normalize_path(&e.path) == path) {
                return Err(HearthError::DuplicatePath { path: path.clone() });
            }

            let mut id = EntryId::generate();
            while servers.iter().any(|e| e.id == id) {
                id = EntryId::generate();
            }

            let entry = ManagedEntry {
                id,
                name: entry_name(name, &path),
                path: path.clone(),
                artifact_name: artifact.to_string(),
            };
            servers.push(entry.clone());
            Ok(entry)
        })
        .inspect(|entry| info!("Registered {} ({}) at {}", entry.name, entry.id, entry.path.display()))
    }

    /// Remove an entry. Returns the removed record, or `None` if it was absent.
    pub fn remove(&self, id: &EntryId) -> Result<Option<ManagedEntry>> {
        let removed = self.modify(|servers| {
            let index = servers.iter().position(|e| &e.id == id);
            Ok(index.map(|i| servers.remove(i)))
        })?;
        if let Some(ref entry) = removed {
            info!("Removed {} ({})", entry.name, entry.id);
        }
        Ok(removed)
    }

    /// Change the artifact an entry launches.
    pub fn update_artifact(&self, id: &EntryId, artifact: &str) -> Result<ManagedEntry> {
        self.modify(|servers| {
            let entry = servers
                .iter_mut()
                .find(|e| &e.id == id)
                .ok_or_else(|| HearthError::entry_not_found(id))?;
            entry.artifact_name = artifact.to_string();
            Ok(entry.clone())
        })
        .inspect(|entry| info!("{} now launches {}", entry.id, entry.artifact_name))
    }

    fn load(&self) -> Result<RegistryDocument> {
        Ok(atomic_read_json(&self.path)?.unwrap_or_default())
    }

    /// Locked read-modify-write. Nothing is written if `f` fails.
    fn modify<T>(&self, f: impl FnOnce(&mut Vec<ManagedEntry>) -> Result<T>) -> Result<T> {
        with_file_lock(&self.path, || {
            let mut doc = self.load()?;
            let mut servers = doc.servers.clone();
            let out = f(&mut servers)?;
            if servers != doc.servers {
                doc.servers = servers;
                doc.version = REGISTRY_VERSION;
                atomic_write_json(&self.path, &doc)?;
            }
            Ok(out)
        })
    }
}

/// Lexically normalise a path so `/srv/a/` and `/srv/a` compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn entry_name(name: &str, path: &Path) -> String {
    let name = name.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| AppConfig::DEFAULT_ENTRY_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> RegistryStore {
        RegistryStore::new(temp_dir.path().join("servers.json"))
    }

    #[test]
    fn test_empty_registry() {
        let temp_dir = TempDir::new().unwrap();
        assert!(store(&temp_dir).list().unwrap().is_empty());
    }

    #[test]
    fn test_add_then_list() {
        let temp_dir = TempDir::new().unwrap();
        let registry = store(&temp_dir);

        let first = registry.add("Main", Path::new("/srv/a"), "a.jar").unwrap();
        let second = registry.add("Friends", Path::new("/srv/b"), "b.jar").unwrap();

        let entries = registry.list().unwrap();
        assert_eq!(entries, vec![first.clone(), second.clone()]);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let registry = store(&temp_dir);

        registry.add("Main", Path::new("/srv/a"), "a.jar").unwrap();
        let before = std::fs::read_to_string(registry.path()).unwrap();

        let err = registry
            .add("Again", Path::new("/srv/a/"), "other.jar")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicatePath);

        let after = std::fs::read_to_string(registry.path()).unwrap();
        assert_eq!(before, after);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_remove() {
        let temp_dir = TempDir::new().unwrap();
        let registry = store(&temp_dir);

        let first = registry.add("", Path::new("/srv/a"), "a.jar").unwrap();
        registry.remove(&first.id).unwrap();
        let again = registry.add("", Path::new("/srv/a"), "a.jar").unwrap();

        assert_ne!(first.id, again.id);
    }

    #[test]
    fn test_remove_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let registry = store(&temp_dir);
        assert!(registry.remove(&EntryId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn test_update_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let registry = store(&temp_dir);

        let entry = registry.add("Main", Path::new("/srv/a"), "a.jar").unwrap();
        let updated = registry.update_artifact(&entry.id, "b.jar").unwrap();
        assert_eq!(updated.artifact_name, "b.jar");
        assert_eq!(
            registry.get(&entry.id).unwrap().unwrap().artifact_name,
            "b.jar"
        );

        let err = registry
            .update_artifact(&EntryId::from("missing"), "c.jar")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_entry_name_fallbacks() {
        assert_eq!(entry_name("  My server ", Path::new("/srv/a")), "My server");
        assert_eq!(entry_name("", Path::new("/srv/lumi_main")), "lumi_main");
        assert_eq!(entry_name("", Path::new("/")), AppConfig::DEFAULT_ENTRY_NAME);
    }

    #[test]
    fn test_serialized_field_names() {
        let temp_dir = TempDir::new().unwrap();
        let registry = store(&temp_dir);
        registry.add("Main", Path::new("/srv/a"), "a.jar").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(registry.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["servers"][0]["coreJar"], "a.jar");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/srv/a/")), PathBuf::from("/srv/a"));
        assert_eq!(normalize_path(Path::new("/srv/./a")), PathBuf::from("/srv/a"));
    }
}
