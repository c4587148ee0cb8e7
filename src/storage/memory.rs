//! In-memory storage backend (C4): the default, ephemeral namespace backing
//! store. Lazily evicts expired entries on every read path — there is no
//! background sweep.

use super::listing;
use super::traits::{
    ListRequest, ListResult, RangeSpec, ResolvedRange, Storage, StorageError, StoredKeyRecord,
    StoredMeta, StoredValue,
};
use crate::clock::Clock;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Bytes,
    meta: StoredMeta,
}

/// A plain in-memory key/value store, scoped to a single namespace instance.
pub struct MemoryStorage {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn is_live(&self, entry: &Entry, now_secs: i64) -> bool {
        !entry.meta.is_expired_at(now_secs)
    }

    /// Snapshot the current entries, dropping any that are expired as of
    /// now. Used both by reads and by [`crate::storage::stacked`] when it
    /// pushes/pops layers.
    pub fn snapshot(&self) -> HashMap<String, (Bytes, StoredMeta)> {
        let now = self.clock.now_secs();
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| self.is_live(e, now))
            .map(|(k, e)| (k.clone(), (e.bytes.clone(), e.meta.clone())))
            .collect()
    }

    /// Replace the entire contents with a given snapshot (used to restore a
    /// popped stack layer).
    pub fn restore(&self, snapshot: HashMap<String, (Bytes, StoredMeta)>) {
        let mut entries = self.entries.write();
        entries.clear();
        for (k, (bytes, meta)) in snapshot {
            entries.insert(k, Entry { bytes, meta });
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        let now = self.clock.now_secs();
        let entries = self.entries.read();
        Ok(entries.get(key).is_some_and(|e| self.is_live(e, now)))
    }

    async fn head(&self, key: &str) -> Result<Option<StoredKeyRecord>, StorageError> {
        let now = self.clock.now_secs();
        let entries = self.entries.read();
        Ok(entries.get(key).filter(|e| self.is_live(e, now)).map(|e| StoredKeyRecord {
            name: key.to_string(),
            expiration: e.meta.expiration,
            metadata: e.meta.metadata.clone(),
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        let now = self.clock.now_secs();
        let entries = self.entries.read();
        Ok(entries.get(key).filter(|e| self.is_live(e, now)).map(|e| StoredValue {
            bytes: e.bytes.clone(),
            meta: e.meta.clone(),
        }))
    }

    async fn get_range(
        &self,
        key: &str,
        range: Option<RangeSpec>,
    ) -> Result<Option<(StoredValue, ResolvedRange)>, StorageError> {
        let value = match self.get(key).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        let size = value.bytes.len() as u64;
        let resolved = match range {
            Some(r) => r.resolve(size)?,
            None => ResolvedRange { offset: 0, length: size },
        };
        let slice = value
            .bytes
            .slice(resolved.offset as usize..(resolved.offset + resolved.length) as usize);
        Ok(Some((
            StoredValue {
                bytes: slice,
                meta: value.meta,
            },
            resolved,
        )))
    }

    async fn put(&self, key: &str, bytes: Bytes, meta: StoredMeta) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), Entry { bytes, meta });
        debug!(key, "memory storage put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.write();
        match entries.remove(key) {
            Some(e) => Ok(self.is_live(&e, now)),
            None => Ok(false),
        }
    }

    async fn list(&self, request: ListRequest) -> Result<ListResult, StorageError> {
        let now = self.clock.now_secs();
        let entries: Vec<StoredKeyRecord> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| self.is_live(e, now))
            .map(|(k, e)| StoredKeyRecord {
                name: k.clone(),
                expiration: e.meta.expiration,
                metadata: e.meta.metadata.clone(),
            })
            .collect();
        listing::apply(&request, entries)
    }
}
