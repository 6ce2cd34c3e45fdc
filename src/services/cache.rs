use crate::error::BackendError;
use crate::form::value::{scalar_text, Payload};
use crate::services::store::{ListPage, QueryParams, RecordStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, String>>,
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Ok(mut map) = self.map.lock() {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut map) = self.map.lock() {
            map.remove(key);
        }
        Ok(())
    }
}

/// One `<key>.json` file per entry under `dir`; `:` and `/` in keys become `_`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '\\') { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        std::fs::write(&path, value).with_context(|| format!("writing {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("removing {}", path.display()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheBlob {
    items: Vec<JsonValue>,
    count: u64,
    #[serde(rename = "updatedAt", default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    params: Option<QueryParams>,
    #[serde(default)]
    by_id: BTreeMap<String, JsonValue>,
}

impl CacheBlob {
    fn index(&mut self) {
        self.by_id = self
            .items
            .iter()
            .filter_map(|r| r.get("id").map(|id| (scalar_text(id), r.clone())))
            .collect();
    }

    fn put(&mut self, rec: &JsonValue) {
        let Some(id) = rec.get("id").filter(|v| !v.is_null()).map(scalar_text) else {
            return;
        };
        if let Some(slot) = self
            .items
            .iter_mut()
            .find(|r| r.get("id").map(scalar_text).as_deref() == Some(id.as_str()))
        {
            *slot = rec.clone();
        }
        self.by_id.insert(id, rec.clone());
    }

    fn drop_id(&mut self, id: &str) {
        let before = self.items.len();
        self.items
            .retain(|r| r.get("id").map(scalar_text).as_deref() != Some(id));
        if self.items.len() < before {
            self.count = self.count.saturating_sub(1);
        }
        self.by_id.remove(id);
    }
}

pub struct CachedStore {
    key: String,
    inner: Arc<dyn RecordStore>,
    storage: Arc<dyn KeyValueStorage>,
    ttl: Option<Duration>,
    blob: Mutex<Option<CacheBlob>>,
}

impl std::fmt::Debug for CachedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CachedStore {
    /// `ttl: None` keeps the blob up to date but never serves from it.
    pub fn new(
        name: &str,
        inner: Arc<dyn RecordStore>,
        storage: Arc<dyn KeyValueStorage>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            key: format!("mdl:{name}"),
            inner,
            storage,
            ttl,
            blob: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached record by id, without touching the inner store.
    pub fn cached(&self, id: &JsonValue) -> Option<JsonValue> {
        self.with_blob(|b| b.by_id.get(&scalar_text(id)).cloned())
    }

    pub fn invalidate(&self) -> Result<()> {
        if let Ok(mut slot) = self.blob.lock() {
            *slot = None;
        }
        self.storage.remove(&self.key)
    }

    fn hydrate(&self) -> Option<CacheBlob> {
        let raw = self.storage.get(&self.key)?;
        match serde_json::from_str::<CacheBlob>(&raw) {
            Ok(mut blob) => {
                if blob.by_id.is_empty() {
                    blob.index();
                }
                Some(blob)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "discarding unreadable cache blob");
                None
            }
        }
    }

    fn with_blob<T>(&self, f: impl FnOnce(&mut CacheBlob) -> T) -> T {
        let mut slot = match self.blob.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = self.hydrate();
        }
        f(slot.get_or_insert_with(CacheBlob::default))
    }

    fn persist(&self, blob: &CacheBlob) {
        let res = serde_json::to_string(blob)
            .map_err(anyhow::Error::from)
            .and_then(|s| self.storage.set(&self.key, &s));
        if let Err(e) = res {
            warn!(key = %self.key, error = %e, "failed to persist cache blob");
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut CacheBlob)) {
        self.with_blob(|b| {
            f(b);
            b.updated_at = Some(Utc::now());
            self.persist(b);
        });
    }

    fn fresh_hit(&self, params: &QueryParams) -> Option<ListPage> {
        let ttl = chrono::Duration::from_std(self.ttl?).ok()?;
        self.with_blob(|b| {
            let at = b.updated_at?;
            if Utc::now() - at > ttl || b.params.as_ref() != Some(params) {
                return None;
            }
            Some(ListPage {
                items: b.items.clone(),
                count: b.count,
            })
        })
    }

    fn store_page(&self, params: &QueryParams, page: &ListPage) {
        self.mutate(|b| {
            b.items = page.items.clone();
            b.count = page.count;
            b.params = Some(params.clone());
            b.index();
        });
    }
}

impl RecordStore for CachedStore {
    fn get(&self, id: &JsonValue) -> Result<JsonValue, BackendError> {
        let rec = self.inner.get(id)?;
        self.mutate(|b| b.put(&rec));
        Ok(rec)
    }

    fn list(&self, params: &QueryParams) -> Result<ListPage, BackendError> {
        if let Some(page) = self.fresh_hit(params) {
            debug!(key = %self.key, "list served from cache");
            return Ok(page);
        }
        self.list_fresh(params)
    }

    fn list_fresh(&self, params: &QueryParams) -> Result<ListPage, BackendError> {
        let page = self.inner.list_fresh(params)?;
        self.store_page(params, &page);
        Ok(page)
    }

    fn create(&self, payload: &Payload) -> Result<JsonValue, BackendError> {
        let rec = self.inner.create(payload)?;
        self.mutate(|b| b.put(&rec));
        Ok(rec)
    }

    fn update(&self, id: &JsonValue, payload: &Payload) -> Result<JsonValue, BackendError> {
        let rec = self.inner.update(id, payload)?;
        self.mutate(|b| b.put(&rec));
        Ok(rec)
    }

    fn delete(&self, id: &JsonValue) -> Result<(), BackendError> {
        self.inner.delete(id)?;
        self.mutate(|b| b.drop_id(&scalar_text(id)));
        Ok(())
    }
}
