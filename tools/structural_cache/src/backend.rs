//! Key-value stores that can hold the structural cache.
//!
//! Each backend owns a namespace: `clear` and `len` operate on every key the backend holds.

use redis::Commands as _;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub trait StoreBackend: Send + Sync {
    /// Short name used in logs and stats.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value. `ttl` is a hint; backends that
    /// cannot expire keys ignore it.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes every key. Returns the number of keys removed.
    fn clear(&self) -> Result<usize, StoreError>;

    /// Number of keys held.
    fn len(&self) -> Result<usize, StoreError>;
}

/// Stores each key in its own file under a directory. Writes go through a temporary file that is
/// renamed into place, so readers never observe a partially-written value.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<DirStore, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DirStore { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        let hash = Sha256::digest(key.as_bytes());
        let name: String = hash.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(name + ".json")
    }

    fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

impl StoreBackend for DirStore {
    fn name(&self) -> &'static str {
        "dir"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8], _ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(value)?;
        file.persist(self.path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let entries = self.entries()?;
        for path in &entries {
            fs::remove_file(path)?;
        }
        Ok(entries.len())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries()?.len())
    }
}

/// Redis-backed store. All keys are namespaced under `prefix`.
pub struct RedisStore {
    connection: Mutex<redis::Connection>,
    prefix: String,
}

impl RedisStore {
    pub fn connect(url: &str, prefix: &str, timeout: Duration) -> Result<RedisStore, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_with_timeout(timeout)?;
        Ok(RedisStore {
            connection: Mutex::new(connection),
            prefix: prefix.to_string(),
        })
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, redis::Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Unavailable("redis connection lock poisoned".into()))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn namespaced_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut connection = self.connection()?;
        let keys: Vec<String> = connection
            .scan_match::<_, String>(format!("{}*", self.prefix))?
            .collect();
        Ok(keys)
    }
}

impl StoreBackend for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.connection()?.get(self.key(key))?)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut connection = self.connection()?;
        match ttl {
            Some(ttl) => connection.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))?,
            None => connection.set::<_, _, ()>(self.key(key), value)?,
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.connection()?.del::<_, ()>(self.key(key))?;
        Ok(())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let keys = self.namespaced_keys()?;
        if !keys.is_empty() {
            self.connection()?.del::<_, ()>(&keys)?;
        }
        Ok(keys.len())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.namespaced_keys()?.len())
    }
}

/// In-process store, for tests and single-run use.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".into())
}

impl StoreBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8], _ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modernize_core::test_util::tempdir;

    fn exercise(store: &dyn StoreBackend) {
        assert_eq!(store.get("entry:/a.py").unwrap(), None);
        store.set("entry:/a.py", b"one", None).unwrap();
        store.set("entry:/b.py", b"two", None).unwrap();
        store.set("entry:/a.py", b"three", None).unwrap();
        assert_eq!(store.get("entry:/a.py").unwrap().as_deref(), Some(&b"three"[..]));
        assert_eq!(store.len().unwrap(), 2);
        store.delete("entry:/a.py").unwrap();
        store.delete("entry:/never-written.py").unwrap();
        assert_eq!(store.get("entry:/a.py").unwrap(), None);
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn dir_store() {
        let dir = tempdir().unwrap();
        let store = DirStore::open(dir.path().join("cache")).unwrap();
        exercise(&store);
        // No temporary files are left behind.
        store.set("k", b"v", None).unwrap();
        assert_eq!(fs::read_dir(dir.path().join("cache")).unwrap().count(), 1);
    }
}
