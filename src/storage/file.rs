//! Filesystem storage backend (C5): one file per key plus an optional
//! `<key>.meta.json` sidecar, grounded in the atomic-write pattern of a
//! filesystem object-storage backend (write-to-temp + fsync + rename).

use super::listing;
use super::traits::{
    ListRequest, ListResult, RangeSpec, ResolvedRange, Storage, StorageError, StoredKeyRecord,
    StoredMeta, StoredValue,
};
use crate::clock::Clock;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, instrument, warn};

const ENOSPC: i32 = 28;
const MAX_NAME_BYTES: usize = 255;

fn io_to_storage_error(e: std::io::Error) -> StorageError {
    if e.raw_os_error() == Some(ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(e)
    }
}

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a logical key into a filesystem-safe name, per spec §4.5.
/// Returns `None` for the two names that cannot be sanitized into anything
/// safe at all (`.` and `..`).
pub fn sanitize(key: &str) -> Option<String> {
    if key == "." || key == ".." {
        return None;
    }

    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        let replace = matches!(c, '/' | '\\' | ':' | '|' | '?' | '<' | '>' | '"' | '\'' | '^') || c.is_control();
        out.push(if replace { '_' } else { c });
    }

    let trimmed = out.trim_end_matches(|c| c == ' ' || c == '.');
    let mut out = if trimmed.is_empty() { "_".to_string() } else { trimmed.to_string() };

    let upper = out.to_ascii_uppercase();
    let stem = upper.split('.').next().unwrap_or(&upper);
    if RESERVED_DEVICE_NAMES.contains(&stem) {
        out.push('_');
    }

    if out.len() > MAX_NAME_BYTES {
        let mut truncated = out.as_bytes()[..MAX_NAME_BYTES].to_vec();
        while std::str::from_utf8(&truncated).is_err() {
            truncated.pop();
        }
        out = String::from_utf8(truncated).unwrap();
    }

    Some(out)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SidecarMeta {
    /// Original, unsanitized key. Required whenever sanitization changed the
    /// on-disk name, so listing can recover it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn atomic_write(path: &Path, data: Vec<u8>) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Other("cannot atomic-write to a path with no parent".into()))?
        .to_path_buf();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_to_storage_error)?;
        tmp.write_all(&data).map_err(io_to_storage_error)?;
        tmp.as_file().sync_all().map_err(io_to_storage_error)?;
        tmp.persist(&path).map_err(|e| io_to_storage_error(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {e}")))?
}

/// Filesystem-backed [`Storage`] implementation, rooted at a single directory.
pub struct FileStorage {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { root: root.into(), clock }
    }

    fn data_path(&self, sanitized: &str) -> PathBuf {
        self.root.join(sanitized)
    }

    fn meta_path(&self, sanitized: &str) -> PathBuf {
        self.root.join(format!("{sanitized}.meta.json"))
    }

    async fn read_meta(&self, sanitized: &str) -> Result<SidecarMeta, StorageError> {
        let path = self.meta_path(sanitized);
        if !path_exists(&path).await {
            return Ok(SidecarMeta::default());
        }
        let bytes = fs::read(&path).await.map_err(io_to_storage_error)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_meta(&self, sanitized: &str, meta: &SidecarMeta) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(meta)?;
        atomic_write(&self.meta_path(sanitized), data).await
    }

    async fn remove_if_exists(&self, path: &Path) -> Result<(), StorageError> {
        if path_exists(path).await {
            fs::remove_file(path).await.map_err(io_to_storage_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    #[instrument(skip(self))]
    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.head(key).await?.is_some())
    }

    #[instrument(skip(self))]
    async fn head(&self, key: &str) -> Result<Option<StoredKeyRecord>, StorageError> {
        let sanitized = match sanitize(key) {
            Some(s) => s,
            None => return Ok(None),
        };
        if !path_exists(&self.data_path(&sanitized)).await {
            return Ok(None);
        }
        let meta = self.read_meta(&sanitized).await?;
        let now = self.clock.now_secs();
        if matches!(meta.expiration, Some(exp) if now >= exp) {
            warn!(key, "evicting expired file entry on read");
            let _ = self.remove_if_exists(&self.data_path(&sanitized)).await;
            let _ = self.remove_if_exists(&self.meta_path(&sanitized)).await;
            return Ok(None);
        }
        Ok(Some(StoredKeyRecord {
            name: key.to_string(),
            expiration: meta.expiration,
            metadata: meta.metadata,
        }))
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        let record = match self.head(key).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        let sanitized = sanitize(key).expect("head returned Some implies key sanitizes");
        let bytes = fs::read(self.data_path(&sanitized)).await.map_err(io_to_storage_error)?;
        Ok(Some(StoredValue {
            bytes: Bytes::from(bytes),
            meta: StoredMeta {
                expiration: record.expiration,
                metadata: record.metadata,
            },
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
            StoredValue { bytes: slice, meta: value.meta },
            resolved,
        )))
    }

    #[instrument(skip(self, bytes))]
    async fn put(&self, key: &str, bytes: Bytes, meta: StoredMeta) -> Result<(), StorageError> {
        let sanitized = sanitize(key).ok_or_else(|| {
            StorageError::Other(format!("key {key:?} cannot be sanitized into a filename"))
        })?;
        fs::create_dir_all(&self.root).await.map_err(io_to_storage_error)?;

        // Value file first, then metadata sidecar (spec §4.5 atomicity note:
        // a reader that sees the value without the sidecar treats it as
        // having default metadata, which is always safe).
        atomic_write(&self.data_path(&sanitized), bytes.to_vec()).await?;

        let needs_sidecar = sanitized != key || meta.expiration.is_some() || meta.metadata.is_some();
        if needs_sidecar {
            let sidecar = SidecarMeta {
                key: if sanitized != key { Some(key.to_string()) } else { None },
                expiration: meta.expiration,
                metadata: meta.metadata,
            };
            self.write_meta(&sanitized, &sidecar).await?;
        } else {
            let _ = self.remove_if_exists(&self.meta_path(&sanitized)).await;
        }
        debug!(key, "file storage put");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let sanitized = match sanitize(key) {
            Some(s) => s,
            None => return Ok(false),
        };
        let existed = path_exists(&self.data_path(&sanitized)).await;
        self.remove_if_exists(&self.data_path(&sanitized)).await?;
        self.remove_if_exists(&self.meta_path(&sanitized)).await?;
        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn list(&self, request: ListRequest) -> Result<ListResult, StorageError> {
        if !path_exists(&self.root).await {
            return listing::apply(&request, Vec::new());
        }

        let mut dir = fs::read_dir(&self.root).await.map_err(io_to_storage_error)?;
        let mut entries = Vec::new();
        let now = self.clock.now_secs();

        while let Some(dir_entry) = dir.next_entry().await.map_err(io_to_storage_error)? {
            let file_name = dir_entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.ends_with(".meta.json") {
                continue;
            }
            let sanitized = file_name.to_string();
            let meta = self.read_meta(&sanitized).await?;
            if matches!(meta.expiration, Some(exp) if now >= exp) {
                continue;
            }
            entries.push(StoredKeyRecord {
                name: meta.key.unwrap_or(sanitized),
                expiration: meta.expiration,
                metadata: meta.metadata,
            });
        }

        listing::apply(&request, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual;
    use tempfile::tempdir;

    fn storage(root: &Path) -> FileStorage {
        FileStorage::new(root, manual(0))
    }

    #[test]
    fn sanitize_rejects_dot_and_dotdot() {
        assert_eq!(sanitize("."), None);
        assert_eq!(sanitize(".."), None);
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("a/b\\c:d"), Some("a_b_c_d".to_string()));
    }

    #[test]
    fn sanitize_handles_reserved_device_names() {
        assert_eq!(sanitize("CON"), Some("CON_".to_string()));
        assert_eq!(sanitize("con"), Some("con_".to_string()));
        assert_eq!(sanitize("COM1"), Some("COM1_".to_string()));
        assert_eq!(sanitize("normal"), Some("normal".to_string()));
    }

    #[test]
    fn sanitize_trims_trailing_spaces_and_dots() {
        assert_eq!(sanitize("name.. "), Some("name".to_string()));
    }

    #[test]
    fn sanitize_truncates_to_255_bytes() {
        let long = "a".repeat(300);
        assert_eq!(sanitize(&long).unwrap().len(), MAX_NAME_BYTES);
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        s.put("k", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();
        let got = s.get("k").await.unwrap().unwrap();
        assert_eq!(got.bytes, Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn sanitized_key_recovers_original_name_in_listing() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        s.put("a/b", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();
        let result = s.list(ListRequest::default()).await.unwrap();
        assert_eq!(result.keys.len(), 1);
        assert_eq!(result.keys[0].name, "a/b");
        assert!(s.get("a/b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let dir = tempdir().unwrap();
        let clock = manual(0);
        let s = FileStorage::new(dir.path(), clock.clone());
        s.put(
            "k",
            Bytes::from_static(b"v"),
            StoredMeta { expiration: Some(10), metadata: None },
        )
        .await
        .unwrap();
        clock.set(10_000);
        assert!(s.get("k").await.unwrap().is_none());
        assert!(!dir.path().join("k").exists());
    }

    #[tokio::test]
    async fn delete_removes_both_value_and_sidecar() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        s.put(
            "k",
            Bytes::from_static(b"v"),
            StoredMeta { expiration: Some(999), metadata: None },
        )
        .await
        .unwrap();
        assert!(dir.path().join("k.meta.json").exists());
        assert!(s.delete("k").await.unwrap());
        assert!(!dir.path().join("k").exists());
        assert!(!dir.path().join("k.meta.json").exists());
    }

    #[tokio::test]
    async fn no_sidecar_written_when_unsanitized_and_no_metadata() {
        let dir = tempdir().unwrap();
        let s = storage(dir.path());
        s.put("plain", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();
        assert!(!dir.path().join("plain.meta.json").exists());
    }
}
