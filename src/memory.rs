//! Persistent agent memory.
//!
//! A flat key-value store saved as a single JSON object. Unlike the
//! variable store it survives process restart: loaded on startup, written
//! back on every mutation (write-temp-then-rename, best effort).

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Persistent key-value memory for the agent.
///
/// With no path configured the store is purely in-memory, which tests and
/// minimal deployments use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    path: Option<PathBuf>,
    data: Map<String, Value>,
}

impl MemoryStore {
    /// In-memory store, nothing persisted.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Load from `path`, starting empty if the file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(map) => {
                    debug!(
                        "[Memory] Loaded {} items from {}",
                        map.len(),
                        path.display()
                    );
                    map
                }
                Err(e) => {
                    warn!("[Memory] {} is not a JSON object ({e}), starting empty", path.display());
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path: Some(path),
            data,
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
        self.save();
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns true when the key existed.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.data.remove(key).is_some();
        if removed {
            self.save();
        }
        removed
    }

    pub fn list(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        if let Err(e) = write_json_atomic(path, &Value::Object(self.data.clone())) {
            warn!("[Memory] Failed to save {}: {e}", path.display());
        }
    }
}

/// Serialize to a sibling temp file, then rename over the target.
pub(crate) fn write_json_atomic(path: &Path, value: &Value) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let mut store = MemoryStore::load(&path);
        store.set("location", Value::String("Oslo".into()));
        store.set("favorite_color", serde_json::json!([0, 128, 255]));

        let reloaded = MemoryStore::load(&path);
        assert_eq!(reloaded.get("location"), Some(&Value::String("Oslo".into())));
        assert_eq!(reloaded.list().len(), 2);
    }

    #[test]
    fn delete_reports_existence() {
        let mut store = MemoryStore::ephemeral();
        store.set("k", Value::from(1));
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "not json").unwrap();

        let store = MemoryStore::load(&path);
        assert!(store.list().is_empty());
    }
}
