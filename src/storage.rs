// Flat key-value snapshot of the editor session. Every value is stored as a
// UTF-8 string; structured values (the project tree, expanded folders) are JSON.

use crate::errors::{CodeboxError, CodeboxErrorType, Result};
use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SnapshotKey {
    Code,
    Language,
    ProjectFiles,
    ProjectName,
    ExpandedFolders,
    Theme,
    ApiKey,
    UseOllama,
    SelectedModel,
    OllamaBaseUrl,
}

impl SnapshotKey {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SnapshotKey::Code => "code",
            SnapshotKey::Language => "language",
            SnapshotKey::ProjectFiles => "projectFiles",
            SnapshotKey::ProjectName => "projectName",
            SnapshotKey::ExpandedFolders => "expandedFolders",
            SnapshotKey::Theme => "theme",
            SnapshotKey::ApiKey => "apiKey",
            SnapshotKey::UseOllama => "useOllama",
            SnapshotKey::SelectedModel => "selectedModel",
            SnapshotKey::OllamaBaseUrl => "ollamaBaseUrl",
        }
    }
}

pub(crate) trait SnapshotStore: Send + Sync {
    fn get(&self, key: SnapshotKey) -> Result<Option<String>>;
    fn put(&self, key: SnapshotKey, value: &str) -> Result<()>;
    fn remove(&self, key: SnapshotKey) -> Result<()>;
}

/// Read a key, logging and swallowing storage failures.
pub(crate) fn load_or_log(store: &dyn SnapshotStore, key: SnapshotKey) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("Failed to read {} from snapshot store: {}", key.as_str(), e);
            None
        }
    }
}

/// Write a key, logging and swallowing storage failures. The in-memory state
/// stays authoritative when the store is unavailable.
pub(crate) fn persist_or_log(store: &dyn SnapshotStore, key: SnapshotKey, value: &str) -> bool {
    match store.put(key, value) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to persist {}: {}", key.as_str(), e);
            false
        }
    }
}

/// Drop a key, logging and swallowing storage failures.
pub(crate) fn remove_or_log(store: &dyn SnapshotStore, key: SnapshotKey) -> bool {
    match store.remove(key) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to remove {}: {}", key.as_str(), e);
            false
        }
    }
}

pub(crate) struct SledStore {
    db: Db,
}

impl SledStore {
    pub(crate) fn open(path: &Path) -> Result<SledStore> {
        let db = match sled::open(path) {
            Ok(db) => db,
            Err(e) => {
                tracing::error!(
                    "Sled failed to open snapshot database at {}: {}",
                    path.display(),
                    e
                );
                return Err(CodeboxError::new(
                    CodeboxErrorType::IOError,
                    "Failed to open database".to_string(),
                ));
            }
        };
        Ok(SledStore { db })
    }
}

impl SnapshotStore for SledStore {
    fn get(&self, key: SnapshotKey) -> Result<Option<String>> {
        let value = self.db.get(key.as_str().as_bytes())?;
        match value {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec()).map(Some).map_err(|e| {
                CodeboxError::new(
                    CodeboxErrorType::IOError,
                    format!("Stored value for {} is not valid UTF-8: {}", key.as_str(), e),
                )
            }),
        }
    }

    fn put(&self, key: SnapshotKey, value: &str) -> Result<()> {
        self.db.insert(key.as_str().as_bytes(), value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn remove(&self, key: SnapshotKey) -> Result<()> {
        self.db.remove(key.as_str().as_bytes())?;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    values: Mutex<HashMap<SnapshotKey, String>>,
}

impl MemoryStore {
    pub(crate) fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SnapshotKey, String>>> {
        self.values.lock().map_err(|_| {
            CodeboxError::new(
                CodeboxErrorType::InternalError,
                "Snapshot store lock poisoned".to_string(),
            )
        })
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: SnapshotKey) -> Result<Option<String>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    fn put(&self, key: SnapshotKey, value: &str) -> Result<()> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: SnapshotKey) -> Result<()> {
        self.lock()?.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A store whose writes always fail, for exercising the log-and-continue path.
    pub(crate) struct BrokenStore;

    impl SnapshotStore for BrokenStore {
        fn get(&self, _key: SnapshotKey) -> Result<Option<String>> {
            Err(CodeboxError::new(CodeboxErrorType::IOError, "disk gone".into()))
        }
        fn put(&self, _key: SnapshotKey, _value: &str) -> Result<()> {
            Err(CodeboxError::new(CodeboxErrorType::IOError, "quota exceeded".into()))
        }
        fn remove(&self, _key: SnapshotKey) -> Result<()> {
            Err(CodeboxError::new(CodeboxErrorType::IOError, "disk gone".into()))
        }
    }

    #[test]
    fn sled_store_survives_reopen() {
        let scratch = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(scratch.path()).unwrap();
            store.put(SnapshotKey::ProjectName, "Demo").unwrap();
            store.put(SnapshotKey::Theme, "light").unwrap();
            store.remove(SnapshotKey::Theme).unwrap();
        }
        let store = SledStore::open(scratch.path()).unwrap();
        assert_eq!(store.get(SnapshotKey::ProjectName).unwrap().as_deref(), Some("Demo"));
        assert_eq!(store.get(SnapshotKey::Theme).unwrap(), None);
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryStore::new();
        store.put(SnapshotKey::Code, "a").unwrap();
        store.put(SnapshotKey::Code, "b").unwrap();
        assert_eq!(store.get(SnapshotKey::Code).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn broken_store_is_absorbed() {
        assert!(!persist_or_log(&BrokenStore, SnapshotKey::Code, "x"));
        assert!(!remove_or_log(&BrokenStore, SnapshotKey::ApiKey));
        assert_eq!(load_or_log(&BrokenStore, SnapshotKey::Code), None);
    }

    #[test]
    fn keys_match_front_end_names() {
        assert_eq!(SnapshotKey::ProjectFiles.as_str(), "projectFiles");
        assert_eq!(SnapshotKey::UseOllama.as_str(), "useOllama");
        assert_eq!(SnapshotKey::OllamaBaseUrl.as_str(), "ollamaBaseUrl");
    }
}
