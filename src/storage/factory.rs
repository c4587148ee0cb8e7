//! Namespace → backend resolver (C7). Resolves `(namespace, persist)` pairs
//! to a single cached backend instance; identical calls return the same
//! instance, mirroring a Wrangler-style persistence flag without actually
//! depending on Wrangler or any config-file loader (out of scope, see
//! SPEC_FULL.md §1/§2.3).

use super::file::{sanitize, FileStorage};
use super::memory::MemoryStorage;
use super::traits::Storage;
use crate::clock::Clock;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persistence policy for a namespace, per spec §4.7:
/// `persist ∈ {absent, false, true, string-path, scheme-URL}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Persist {
    /// No `persist` option supplied at all.
    Absent,
    /// `persist: false` — explicitly ephemeral.
    False,
    /// `persist: true` — persist under the factory's default root.
    True,
    /// `persist: "<path>"` — persist under an explicit directory.
    Path(String),
    /// `persist: "<scheme>://..."` — a remote backend URL. Remote backends
    /// are out of scope for this emulator (see Non-goals); this degrades to
    /// a local directory keyed by the sanitized URL, which is sufficient to
    /// give the namespace a stable, isolated on-disk location.
    Url(String),
}

impl Persist {
    fn is_ephemeral(&self) -> bool {
        matches!(self, Persist::Absent | Persist::False)
    }
}

type CacheKey = (String, Persist);

/// Resolves KV/R2/Cache namespaces to concrete [`Storage`] backends and
/// caches them for the lifetime of the factory.
pub struct StorageFactory {
    clock: Arc<dyn Clock>,
    process_root: PathBuf,
    backends: DashMap<CacheKey, Arc<dyn Storage>>,
}

impl StorageFactory {
    pub fn new(clock: Arc<dyn Clock>, process_root: impl Into<PathBuf>) -> Self {
        Self {
            clock,
            process_root: process_root.into(),
            backends: DashMap::new(),
        }
    }

    /// Resolve (and cache) the backend for `namespace` under `persist`.
    pub fn storage(&self, namespace: &str, persist: Persist) -> Arc<dyn Storage> {
        let key = (namespace.to_string(), persist.clone());
        if let Some(existing) = self.backends.get(&key) {
            return existing.clone();
        }

        let backend: Arc<dyn Storage> = if persist.is_ephemeral() {
            Arc::new(MemoryStorage::new(self.clock.clone()))
        } else {
            let root = self.resolve_root(namespace, &persist);
            Arc::new(FileStorage::new(root, self.clock.clone()))
        };

        self.backends.insert(key, backend.clone());
        backend
    }

    fn resolve_root(&self, namespace: &str, persist: &Persist) -> PathBuf {
        let namespace_dir = sanitize(namespace).unwrap_or_else(|| "_".to_string());
        match persist {
            Persist::True => self.process_root.join(&namespace_dir),
            Persist::Path(path) => self.resolve_path(path).join(&namespace_dir),
            Persist::Url(url) => {
                let url_dir = sanitize(url).unwrap_or_else(|| "_".to_string());
                self.process_root.join("remote").join(url_dir).join(&namespace_dir)
            }
            Persist::Absent | Persist::False => unreachable!("ephemeral handled by caller"),
        }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.process_root.join(p)
        }
    }

    /// Release every cached backend. Subsequent `storage()` calls construct
    /// fresh instances.
    pub fn dispose(&self) {
        self.backends.clear();
    }
}
