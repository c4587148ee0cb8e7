//! Stacked in-memory storage (C6): wraps a [`MemoryStorage`] with a stack of
//! prior snapshots, giving test harnesses push-on-enter/pop-on-exit
//! isolation without cloning cost until state actually diverges.

use super::memory::MemoryStorage;
use super::traits::{
    ListRequest, ListResult, RangeSpec, ResolvedRange, Storage, StorageError, StoredKeyRecord,
    StoredMeta, StoredValue,
};
use crate::clock::Clock;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Snapshot = HashMap<String, (Bytes, StoredMeta)>;

/// A [`MemoryStorage`] with an explicit snapshot stack.
pub struct StackedMemoryStorage {
    active: MemoryStorage,
    stack: Mutex<Vec<Snapshot>>,
}

impl StackedMemoryStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            active: MemoryStorage::new(clock),
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Push the current state onto the stack; mutation continues against an
    /// equal, independent copy.
    pub fn push(&self) {
        let snapshot = self.active.snapshot();
        self.stack.lock().push(snapshot);
    }

    /// Pop and restore the top snapshot. Tolerates unbalanced pops (an empty
    /// stack restores an empty map) so namespaces lazily created inside a
    /// scope unwind safely.
    pub fn pop(&self) {
        let snapshot = self.stack.lock().pop().unwrap_or_default();
        self.active.restore(snapshot);
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }
}

#[async_trait]
impl Storage for StackedMemoryStorage {
    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        self.active.has(key).await
    }

    async fn head(&self, key: &str) -> Result<Option<StoredKeyRecord>, StorageError> {
        self.active.head(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        self.active.get(key).await
    }

    async fn get_range(
        &self,
        key: &str,
        range: Option<RangeSpec>,
    ) -> Result<Option<(StoredValue, ResolvedRange)>, StorageError> {
        self.active.get_range(key, range).await
    }

    async fn put(&self, key: &str, bytes: Bytes, meta: StoredMeta) -> Result<(), StorageError> {
        self.active.put(key, bytes, meta).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.active.delete(key).await
    }

    async fn list(&self, request: ListRequest) -> Result<ListResult, StorageError> {
        self.active.list(request).await
    }
}
