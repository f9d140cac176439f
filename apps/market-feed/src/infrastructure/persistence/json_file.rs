//! JSON File Cache Store
//!
//! Durable `CacheStore` keeping one JSON object per namespace in
//! `{dir}/{namespace}.json`. A namespace file is read on first access and
//! rewritten in full after a `set`, through a temporary file and a rename
//! so a crash never leaves a half-written file behind.
//!
//! All disk access goes through `tokio::fs`. The in-memory map is only
//! locked to read or mutate entries, never across a file operation. Writes
//! to a namespace are serialized, and a writer whose change was already
//! covered by a newer snapshot skips its own write, so a burst of `set`
//! calls costs far fewer file rewrites than calls.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;

use crate::application::ports::{CacheStore, StoreError};

type Namespace = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Default)]
struct Loaded {
    entries: Namespace,
    /// Bumped on every `set`.
    version: u64,
}

/// File-backed cache store.
#[derive(Debug)]
pub struct JsonFileCacheStore {
    dir: PathBuf,
    loaded: Mutex<HashMap<String, Loaded>>,
    /// Last version written to disk, per namespace.
    persisted: tokio::sync::Mutex<HashMap<String, u64>>,
}

impl JsonFileCacheStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            loaded: Mutex::new(HashMap::new()),
            persisted: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(namespace)))
    }

    async fn ensure_loaded(&self, namespace: &str) -> Result<(), StoreError> {
        if self.loaded.lock().contains_key(namespace) {
            return Ok(());
        }

        let entries = self.read_namespace(namespace).await?;
        // A concurrent caller may have loaded (and written to) it meanwhile.
        self.loaded
            .lock()
            .entry(namespace.to_string())
            .or_insert(Loaded {
                entries,
                version: 0,
            });
        Ok(())
    }

    async fn read_namespace(&self, namespace: &str) -> Result<Namespace, StoreError> {
        let path = self.path_for(namespace);
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Corrupt cache file, starting empty"
                    );
                    Ok(Namespace::new())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Namespace::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize the current state of `namespace` unless disk already
    /// holds it (`written` is the last version persisted).
    fn snapshot(
        &self,
        namespace: &str,
        written: u64,
    ) -> Result<Option<(Vec<u8>, u64)>, StoreError> {
        let loaded = self.loaded.lock();
        let Some(state) = loaded.get(namespace) else {
            return Ok(None);
        };
        if state.version <= written {
            return Ok(None);
        }
        Ok(Some((serde_json::to_vec(&state.entries)?, state.version)))
    }

    async fn write_namespace(&self, namespace: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(namespace);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonFileCacheStore {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        self.ensure_loaded(namespace).await?;
        Ok(self
            .loaded
            .lock()
            .get(namespace)
            .and_then(|state| state.entries.get(key))
            .cloned())
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.ensure_loaded(namespace).await?;
        {
            let mut loaded = self.loaded.lock();
            let state = loaded.entry(namespace.to_string()).or_default();
            state.entries.insert(key.to_string(), value);
            state.version += 1;
        }

        let mut persisted = self.persisted.lock().await;
        let written = persisted.get(namespace).copied().unwrap_or(0);
        let Some((bytes, version)) = self.snapshot(namespace, written)? else {
            tracing::trace!(namespace, "Cache write already covered");
            return Ok(());
        };
        self.write_namespace(namespace, bytes).await?;
        persisted.insert(namespace.to_string(), version);
        Ok(())
    }
}

fn sanitize(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
