//! Storage interface (C3): the abstract byte-oriented key/value contract
//! every backend (memory, file, stacked) implements identically.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised by a [`Storage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid range")]
    InvalidRange,

    #[error("invalid limit")]
    InvalidLimit,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk full: insufficient storage space")]
    DiskFull,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Other(String),
}

/// Optional fields attached to a stored value: absolute expiration (seconds
/// since epoch) and caller-supplied JSON metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredMeta {
    /// Absolute wall-clock expiration, seconds since epoch. Absent = never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,

    /// Caller-supplied metadata, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StoredMeta {
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        matches!(self.expiration, Some(exp) if now_secs >= exp)
    }
}

/// A value plus its metadata, as returned by `get`/`get_range`.
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub bytes: Bytes,
    pub meta: StoredMeta,
}

/// A key's metadata alone, as returned by `head` and by `list`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredKeyRecord {
    pub name: String,
    pub expiration: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// Range-read request: either `{offset, length}` or `{suffix}`.
#[derive(Debug, Clone, Default)]
pub struct RangeSpec {
    pub offset: Option<i64>,
    pub length: Option<i64>,
    pub suffix: Option<i64>,
}

/// Resolved range of a successful range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub offset: u64,
    pub length: u64,
}

impl RangeSpec {
    /// Resolve this range spec against an object of the given `size`,
    /// applying the clamping/validation rules of spec §3.
    pub fn resolve(&self, size: u64) -> Result<ResolvedRange, StorageError> {
        if let Some(suffix) = self.suffix {
            if suffix <= 0 {
                return Err(StorageError::InvalidRange);
            }
            let suffix = (suffix as u64).min(size);
            return Ok(ResolvedRange {
                offset: size - suffix,
                length: suffix,
            });
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(StorageError::InvalidRange);
        }
        let offset = offset as u64;
        if offset > size {
            return Err(StorageError::InvalidRange);
        }

        let length = match self.length {
            Some(l) if l < 0 => return Err(StorageError::InvalidRange),
            Some(l) => (l as u64).min(size - offset),
            None => size - offset,
        };

        Ok(ResolvedRange { offset, length })
    }
}

/// Listing request: filter, sort direction, pagination cursor, and optional
/// delimiter-based common-prefix collapsing.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: Option<String>,
    pub exclude_prefix: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub reverse: bool,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub delimiter: Option<String>,
}

/// Result of a `list` call: the matched keys, a resume cursor (empty when
/// exhausted), and any delimiter-collapsed common prefixes.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub keys: Vec<StoredKeyRecord>,
    pub cursor: String,
    pub delimited_prefixes: Option<BTreeSet<String>>,
}

/// Abstract byte-oriented key/value storage backend (C3).
///
/// Object-safe so namespaces can hold a `Box<dyn Storage>` / `Arc<dyn
/// Storage>` without committing callers to a concrete backend type.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool, StorageError>;

    async fn head(&self, key: &str) -> Result<Option<StoredKeyRecord>, StorageError>;

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError>;

    async fn get_range(
        &self,
        key: &str,
        range: Option<RangeSpec>,
    ) -> Result<Option<(StoredValue, ResolvedRange)>, StorageError>;

    async fn put(&self, key: &str, bytes: Bytes, meta: StoredMeta) -> Result<(), StorageError>;

    /// Returns whether the key was present before deletion.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn list(&self, request: ListRequest) -> Result<ListResult, StorageError>;

    // === Default batch operations, composed from the singular ops ===

    async fn has_many(&self, keys: &[String]) -> Result<Vec<bool>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.has(k).await?);
        }
        Ok(out)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<StoredValue>>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.get(k).await?);
        }
        Ok(out)
    }

    async fn put_many(&self, entries: Vec<(String, Bytes, StoredMeta)>) -> Result<(), StorageError> {
        for (key, bytes, meta) in entries {
            self.put(&key, bytes, meta).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<bool>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.delete(k).await?);
        }
        Ok(out)
    }
}
