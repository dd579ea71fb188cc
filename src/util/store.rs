use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable string key-value store shared by every instance of the same user.
///
/// Reads and writes are independent: a read-modify-write through this trait is
/// not atomic across instances, and callers must tolerate a concurrent writer
/// overwriting their value.
pub trait Store {
    /// Returns `None` when the key is absent or cannot be read.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// One file per key under a directory. Values are replaced with a temp file
/// plus rename, so readers never observe a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_local_dir>/notificator`, the default location shared by all instances.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("notificator"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.key_path(key);
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "store read failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{}.json.{}.tmp", key, std::process::id()));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.key_path(key))?;
        Ok(())
    }
}

/// In-process store used by tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Decode the JSON value under `key`. Absent keys yield `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    let text = match store.get(key) {
        Some(t) => t,
        None    => return Ok(None),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| Error::StoreDecode { key: key.to_string(), source })
}

/// Like [`load_json`], but corrupt or missing state becomes `T::default()`.
///
/// Fails open on purpose: a value no instance can decode must not wedge every
/// instance forever, so it is discarded and rebuilt on the next write.
pub fn load_or_default<T: DeserializeOwned + Default>(store: &dyn Store, key: &str) -> T {
    match load_json(store, key) {
        Ok(Some(v)) => v,
        Ok(None)    => T::default(),
        Err(e) => {
            warn!("{}; resetting to empty", e);
            T::default()
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    let text = serde_json::to_string(value).map_err(io::Error::from)?;
    store.set(key, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn file_store_missing_key_is_absent() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileStore::new(dir.path());
        assert_eq!(store.get("notificator-shown"), None);
    }

    #[test]
    fn file_store_set_overwrites_and_creates_dir() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileStore::new(dir.path().join("nested"));
        store.set("k", "one").expect("first write");
        store.set("k", "two").expect("second write");
        assert_eq!(store.get("k").as_deref(), Some("two"));

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn two_file_stores_on_one_dir_share_values() {
        let dir = TempDir::new().expect("tempdir");
        let a = FileStore::new(dir.path());
        let b = FileStore::new(dir.path());
        a.set("shared", "{}").expect("write");
        assert_eq!(b.get("shared").as_deref(), Some("{}"));
    }

    #[test]
    fn corrupt_value_loads_as_default() {
        let store = MemoryStore::new();
        store.set("running", "{not json").expect("write");

        let err = load_json::<BTreeMap<i64, i64>>(&store, "running").unwrap_err();
        assert!(matches!(err, Error::StoreDecode { ref key, .. } if key == "running"));

        let map: BTreeMap<i64, i64> = load_or_default(&store, "running");
        assert!(map.is_empty());
    }

    #[test]
    fn save_then_load_integer_keyed_map() {
        let store = MemoryStore::new();
        let mut map = BTreeMap::new();
        map.insert(1_700_000_000_000_i64, 1_700_000_005_000_i64);
        save_json(&store, "running", &map).expect("save");
        assert_eq!(store.get("running").as_deref(), Some(r#"{"1700000000000":1700000005000}"#));
        let back: BTreeMap<i64, i64> = load_or_default(&store, "running");
        assert_eq!(back, map);
    }
}
