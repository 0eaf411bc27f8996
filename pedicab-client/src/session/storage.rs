// pedicab-client/src/session/storage.rs
// 会话存储 - 内存或 JSON 文件

use crate::{ClientError, ClientResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key of the persisted bearer credential
pub const TOKEN_KEY: &str = "auth_token";
/// Key of the persisted role tag
pub const ROLE_KEY: &str = "user_role";

/// Persisted-session port
///
/// Last writer wins; there is no cross-device reconciliation.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;
}

/// In-process storage, lost on exit
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ClientResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ClientError::Storage("session storage lock poisoned".into()))
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// JSON key/value file
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written session behind.
#[derive(Debug)]
pub struct FileSessionStorage {
    path: PathBuf,
    // serialises read-modify-write cycles within this process
    guard: Mutex<()>,
}

impl FileSessionStorage {
    /// 创建会话存储
    pub fn new(base_path: impl Into<PathBuf>, filename: &str) -> Self {
        Self {
            path: base_path.into().join(filename),
            guard: Mutex::new(()),
        }
    }

    /// `session.json` under the configured session directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, "session.json")
    }

    /// 获取路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ClientResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = fs::read_to_string(&self.path).map_err(storage_error)?;
        match serde_json::from_str(&json) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // A corrupt file is the same as no session
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding unreadable session file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(storage_error)?;
        }
        if entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).map_err(storage_error)?;
            }
            return Ok(());
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(storage_error)?;
        fs::rename(&tmp, &self.path).map_err(storage_error)
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> ClientResult<()> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| ClientError::Storage("session file lock poisoned".into()))?;
        let mut entries = self.load()?;
        f(&mut entries);
        self.save(&entries)
    }
}

fn storage_error(err: std::io::Error) -> ClientError {
    ClientError::Storage(err.to_string())
}

impl SessionStorage for FileSessionStorage {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemorySessionStorage::new();
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        storage.set(TOKEN_KEY, "abc").unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
        storage.remove(TOKEN_KEY).unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::in_dir(dir.path().join("nested"));
        storage.set(TOKEN_KEY, "abc").unwrap();
        storage.set(ROLE_KEY, "driver").unwrap();

        let reopened = FileSessionStorage::in_dir(dir.path().join("nested"));
        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get(ROLE_KEY).unwrap().as_deref(), Some("driver"));

        reopened.remove(TOKEN_KEY).unwrap();
        reopened.remove(ROLE_KEY).unwrap();
        assert!(!reopened.path().exists());
    }

    #[test]
    fn test_file_storage_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::in_dir(dir.path());
        fs::write(storage.path(), "{not json").unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        storage.set(TOKEN_KEY, "fresh").unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
    }
}
