//! Object-store engine (C12, "R2"): a versioned object store layered on the
//! C3 [`Storage`] contract, with conditional writes, range reads, checksums,
//! and a multipart upload engine whose part records live under a reserved
//! internal key prefix so they survive the same push/pop stacking as any
//! other key (spec.md §4.12, §6; SPEC_FULL.md's R2 grounding note).

use crate::clock::Clock;
use crate::storage::{ListRequest, RangeSpec, ResolvedRange, Storage, StorageError, StoredMeta};
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Parts smaller than this (except the last) are rejected — spec's
/// `minMultipartUploadSize`. The real platform uses 5 MiB; tests may
/// construct a [`Bucket`] with a smaller value.
pub const DEFAULT_MIN_MULTIPART_UPLOAD_SIZE: u64 = 5 * 1024 * 1024;

const INTERNAL_PREFIX: &str = "__INTERNAL__:multipart:";
const MAX_KEY_BYTES: usize = 1024;
const MIN_PART_NUMBER: u32 = 1;
const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum R2Error {
    #[error("The specified object name is not valid. (10020)")]
    InvalidObjectName,

    #[error("Part number must be between 1 and 10000 (inclusive).")]
    InvalidPartNumber,

    #[error("specified multipart upload does not exist. (10024)")]
    NoSuchUpload,

    #[error("one or more of the specified parts could not be found. (10025)")]
    PartsNotFound,

    #[error("internal error (10001)")]
    Internal,

    #[error("Part sizes must be consistent: every part but the last must be at least the configured minimum and the same size as its peers. (10048)")]
    SizeRule,

    #[error("At least one of the pre-conditions you specified did not hold")]
    PreconditionFailed,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Context(#[from] crate::context::ContextError),
}

fn validate_key(key: &str) -> Result<(), R2Error> {
    if key.len() > MAX_KEY_BYTES {
        return Err(R2Error::InvalidObjectName);
    }
    Ok(())
}

fn validate_part_number(n: u32) -> Result<(), R2Error> {
    if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&n) {
        return Err(R2Error::InvalidPartNumber);
    }
    Ok(())
}

/// HTTP-ish metadata R2 tracks alongside an object, distinct from
/// caller-supplied custom metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_expiry: Option<i64>,
}

/// A committed object's record, as returned by `head`/`get`/`put`/`list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectRecord {
    pub key: String,
    /// Opaque 32-hex-character version token, regenerated on every write.
    pub version: String,
    pub size: u64,
    /// MD5 of the content (or the multipart composite form, see §4.12).
    pub etag: String,
    /// `etag` wrapped in double quotes, as HTTP `ETag` headers carry it.
    pub http_etag: String,
    pub uploaded: i64,
    pub http_metadata: HttpMetadata,
    pub custom_metadata: HashMap<String, String>,
    pub checksums: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub http_metadata: HttpMetadata,
    pub custom_metadata: HashMap<String, String>,
    pub only_if: Option<OnlyIf>,
    /// Caller-supplied MD5 to validate against the computed digest.
    pub md5: Option<[u8; 16]>,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub range: Option<RangeSpec>,
    pub only_if: Option<OnlyIf>,
}

/// `etagMatches`/`etagDoesNotMatch` accept a bare wildcard, a single value,
/// or a list of values (spec §4.12).
#[derive(Debug, Clone)]
pub enum EtagCondition {
    Wildcard,
    One(String),
    Many(Vec<String>),
}

impl EtagCondition {
    /// Whether `etag` satisfies this condition. A lone `*` matches anything;
    /// a leading/trailing `*` on an otherwise literal element acts as a
    /// prefix/suffix wildcard; an embedded `*` elsewhere is literal (Open
    /// Question #2, decided in SPEC_FULL.md).
    fn matches(&self, etag: &str) -> bool {
        match self {
            EtagCondition::Wildcard => true,
            EtagCondition::One(v) => element_matches(v, etag),
            EtagCondition::Many(vs) => vs.iter().any(|v| element_matches(v, etag)),
        }
    }
}

fn element_matches(pattern: &str, etag: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        if !suffix.contains('*') {
            return etag.ends_with(suffix);
        }
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if !prefix.contains('*') {
            return etag.starts_with(prefix);
        }
    }
    pattern == etag
}

#[derive(Debug, Clone, Default)]
pub struct OnlyIf {
    pub etag_matches: Option<EtagCondition>,
    pub etag_does_not_match: Option<EtagCondition>,
    pub uploaded_before: Option<i64>,
    pub uploaded_after: Option<i64>,
}

impl OnlyIf {
    /// Evaluate this conditional against the currently-stored object (`None`
    /// if no object exists at the key). Implements the override rules of
    /// spec §4.12: a satisfied `etagMatches` bypasses `uploadedBefore`; a
    /// satisfied `etagDoesNotMatch` bypasses `uploadedAfter`.
    fn check(&self, existing: Option<&ObjectRecord>) -> bool {
        let mut skip_uploaded_before = false;
        let mut skip_uploaded_after = false;

        if let Some(cond) = &self.etag_matches {
            let holds = existing.is_some_and(|o| cond.matches(&o.etag));
            if !holds {
                return false;
            }
            skip_uploaded_before = true;
        }

        if let Some(cond) = &self.etag_does_not_match {
            let holds = match existing {
                None => true,
                Some(o) => !cond.matches(&o.etag),
            };
            if !holds {
                return false;
            }
            skip_uploaded_after = true;
        }

        if !skip_uploaded_before {
            if let Some(before) = self.uploaded_before {
                if !existing.is_some_and(|o| o.uploaded < before) {
                    return false;
                }
            }
        }

        if !skip_uploaded_after {
            if let Some(after) = self.uploaded_after {
                if !existing.is_some_and(|o| o.uploaded > after) {
                    return false;
                }
            }
        }

        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct R2ListOptions {
    pub prefix: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct R2ListResult {
    pub objects: Vec<ObjectRecord>,
    pub delimited_prefixes: Vec<String>,
    pub cursor: String,
}

fn md5_hex(bytes: &[u8]) -> (String, [u8; 16]) {
    let digest = Md5::digest(bytes);
    let raw: [u8; 16] = digest.into();
    (hex::encode(raw), raw)
}

fn new_version(_clock: &dyn Clock) -> String {
    // Opaque 32-hex token (spec §3: "version (opaque 32-hex)"). Random
    // rather than derived from time/a counter, so nothing observable about
    // the store's history leaks through it.
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PartRecord {
    part_number: u32,
    etag: String,
    md5_raw: Vec<u8>,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum UploadState {
    InProgress,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadIndex {
    upload_id: String,
    key: String,
    http_metadata: HttpMetadata,
    custom_metadata: HashMap<String, String>,
    state: UploadState,
}

/// A bucket: one [`Storage`] namespace exposed through the R2-shaped API.
pub struct Bucket {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    min_multipart_upload_size: u64,
    block_global_async_io: bool,
}

impl Bucket {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            min_multipart_upload_size: DEFAULT_MIN_MULTIPART_UPLOAD_SIZE,
            block_global_async_io: false,
        }
    }

    pub fn with_min_multipart_upload_size(mut self, size: u64) -> Self {
        self.min_multipart_upload_size = size;
        self
    }

    pub fn with_block_global_async_io(mut self, block: bool) -> Self {
        self.block_global_async_io = block;
        self
    }

    fn assert_in_request_if_blocked(&self) -> Result<(), R2Error> {
        if self.block_global_async_io {
            crate::context::assert_in_request()?;
        }
        Ok(())
    }

    async fn wait_for_open(&self) {
        if let Some(ctx) = crate::context::current() {
            ctx.input_gate.wait_for_open().await;
        }
    }

    fn register_on_output_gate<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Some(ctx) = crate::context::current() {
            ctx.output_gate.wait_until(fut);
        }
    }

    async fn load_record(&self, key: &str) -> Result<Option<ObjectRecord>, R2Error> {
        let stored = match self.storage.head(key).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        let metadata = match stored.metadata {
            Some(m) => m,
            None => return Ok(None),
        };
        let record: ObjectRecord = serde_json::from_value(metadata)
            .map_err(|_| R2Error::Internal)?;
        Ok(Some(record))
    }

    pub async fn head(&self, key: &str) -> Result<Option<ObjectRecord>, R2Error> {
        validate_key(key)?;
        self.load_record(key).await
    }

    pub async fn get(
        &self,
        key: &str,
        opts: GetOptions,
    ) -> Result<Option<(ObjectRecord, Bytes, Option<ResolvedRange>)>, R2Error> {
        validate_key(key)?;
        let existing = self.load_record(key).await?;
        if let Some(only_if) = &opts.only_if {
            if !only_if.check(existing.as_ref()) {
                return Err(R2Error::PreconditionFailed);
            }
        }
        let record = match existing {
            Some(r) => r,
            None => return Ok(None),
        };
        let (value, resolved) = match self.storage.get_range(key, opts.range.clone()).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        let range = opts.range.as_ref().map(|_| resolved);
        Ok(Some((record, value.bytes, range)))
    }

    pub async fn put(
        &self,
        key: &str,
        value: Bytes,
        opts: PutOptions,
    ) -> Result<ObjectRecord, R2Error> {
        self.assert_in_request_if_blocked()?;
        validate_key(key)?;

        let existing = self.load_record(key).await?;
        if let Some(only_if) = &opts.only_if {
            if !only_if.check(existing.as_ref()) {
                return Err(R2Error::PreconditionFailed);
            }
        }

        let (md5_digest, md5_raw) = md5_hex(&value);
        if let Some(expected) = opts.md5 {
            if expected != md5_raw {
                return Err(R2Error::Internal);
            }
        }

        let record = ObjectRecord {
            key: key.to_string(),
            version: new_version(self.clock.as_ref()),
            size: value.len() as u64,
            etag: md5_digest.clone(),
            http_etag: format!("\"{md5_digest}\""),
            uploaded: self.clock.now_ms(),
            http_metadata: opts.http_metadata,
            custom_metadata: opts.custom_metadata,
            checksums: HashMap::from([("md5".to_string(), md5_digest)]),
        };

        self.remove_parts_of_completed_uploads(key).await?;

        self.storage
            .put(
                key,
                value,
                StoredMeta {
                    expiration: None,
                    metadata: Some(serde_json::to_value(&record).map_err(|_| R2Error::Internal)?),
                },
            )
            .await?;

        self.wait_for_open().await;
        Ok(record)
    }

    pub async fn delete(&self, key: &str) -> Result<(), R2Error> {
        self.assert_in_request_if_blocked()?;
        validate_key(key)?;
        self.storage.delete(key).await?;
        self.wait_for_open().await;
        Ok(())
    }

    pub async fn list(&self, opts: R2ListOptions) -> Result<R2ListResult, R2Error> {
        let request = ListRequest {
            prefix: opts.prefix,
            exclude_prefix: Some(INTERNAL_PREFIX.to_string()),
            cursor: opts.cursor,
            limit: opts.limit,
            delimiter: opts.delimiter,
            ..Default::default()
        };
        let result = self.storage.list(request).await?;
        let mut objects = Vec::with_capacity(result.keys.len());
        for key_record in &result.keys {
            if let Some(metadata) = &key_record.metadata {
                if let Ok(record) = serde_json::from_value::<ObjectRecord>(metadata.clone()) {
                    objects.push(record);
                }
            }
        }
        Ok(R2ListResult {
            objects,
            delimited_prefixes: result
                .delimited_prefixes
                .map(|s| s.into_iter().collect())
                .unwrap_or_default(),
            cursor: result.cursor,
        })
    }

    fn part_key(upload_id: &str, key: &str, part_number: u32) -> String {
        format!("{INTERNAL_PREFIX}{upload_id}:{key}:{part_number}")
    }

    fn index_key(upload_id: &str, key: &str) -> String {
        format!("{INTERNAL_PREFIX}{upload_id}:{key}:index")
    }

    /// A `put` after a completed upload's parts still exist must remove
    /// them (spec §4.12 "Object write visibility"). In-progress uploads for
    /// the same key are untouched.
    async fn remove_parts_of_completed_uploads(&self, key: &str) -> Result<(), R2Error> {
        let prefix = INTERNAL_PREFIX.to_string();
        let result = self
            .storage
            .list(ListRequest {
                prefix: Some(prefix),
                ..Default::default()
            })
            .await?;
        for record in result.keys {
            if record.name.ends_with(":index") && record.name.contains(&format!(":{key}:")) {
                if let Some(meta) = &record.metadata {
                    if let Ok(index) = serde_json::from_value::<UploadIndex>(meta.clone()) {
                        if index.key == key && index.state == UploadState::Completed {
                            self.purge_upload(&index.upload_id, key).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn purge_upload(&self, upload_id: &str, key: &str) -> Result<(), R2Error> {
        self.storage.delete(&Self::index_key(upload_id, key)).await?;
        for n in MIN_PART_NUMBER..=MAX_PART_NUMBER {
            let part_key = Self::part_key(upload_id, key, n);
            if !self.storage.has(&part_key).await? {
                // Sparse part numbers: stop scanning once we've run past any
                // plausibly-uploaded run. A full scan to 10000 per purge is
                // wasteful; real uploads rarely use more than a handful of
                // parts, so bail once we've seen a stretch of gaps.
                if n > MIN_PART_NUMBER + 32 {
                    break;
                }
                continue;
            }
            self.storage.delete(&part_key).await?;
        }
        Ok(())
    }

    pub async fn create_multipart_upload(
        &self,
        key: &str,
        http_metadata: HttpMetadata,
        custom_metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload, R2Error> {
        self.assert_in_request_if_blocked()?;
        validate_key(key)?;

        let upload_id = new_version(self.clock.as_ref());
        let index = UploadIndex {
            upload_id: upload_id.clone(),
            key: key.to_string(),
            http_metadata: http_metadata.clone(),
            custom_metadata: custom_metadata.clone(),
            state: UploadState::InProgress,
        };
        self.storage
            .put(
                &Self::index_key(&upload_id, key),
                Bytes::new(),
                StoredMeta {
                    expiration: None,
                    metadata: Some(serde_json::to_value(&index).map_err(|_| R2Error::Internal)?),
                },
            )
            .await?;

        self.wait_for_open().await;

        Ok(MultipartUpload {
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            min_multipart_upload_size: self.min_multipart_upload_size,
            upload_id,
            key: key.to_string(),
        })
    }

    /// Pure: returns a handle without validating the upload exists or
    /// touching gates (spec §4.12).
    pub fn resume_multipart_upload(&self, key: &str, upload_id: &str) -> MultipartUpload {
        MultipartUpload {
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            min_multipart_upload_size: self.min_multipart_upload_size,
            upload_id: upload_id.to_string(),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

/// A handle to one in-progress (or resumed) multipart upload.
pub struct MultipartUpload {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    min_multipart_upload_size: u64,
    upload_id: String,
    key: String,
}

impl MultipartUpload {
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn part_key(&self, part_number: u32) -> String {
        Bucket::part_key(&self.upload_id, &self.key, part_number)
    }

    fn index_key(&self) -> String {
        Bucket::index_key(&self.upload_id, &self.key)
    }

    async fn load_index(&self) -> Result<UploadIndex, R2Error> {
        let record = self
            .storage
            .head(&self.index_key())
            .await?
            .ok_or(R2Error::NoSuchUpload)?;
        let metadata = record.metadata.ok_or(R2Error::NoSuchUpload)?;
        serde_json::from_value(metadata).map_err(|_| R2Error::NoSuchUpload)
    }

    async fn wait_for_open(&self) {
        if let Some(ctx) = crate::context::current() {
            ctx.input_gate.wait_for_open().await;
        }
    }

    pub async fn upload_part(&self, part_number: u32, value: Bytes) -> Result<UploadedPart, R2Error> {
        validate_part_number(part_number)?;

        let index = self.load_index().await?;
        if index.state != UploadState::InProgress {
            return Err(R2Error::NoSuchUpload);
        }

        let (etag, md5_raw) = md5_hex(&value);
        let part = PartRecord {
            part_number,
            etag: etag.clone(),
            md5_raw: md5_raw.to_vec(),
            size: value.len() as u64,
        };

        self.storage
            .put(
                &self.part_key(part_number),
                value,
                StoredMeta {
                    expiration: None,
                    metadata: Some(serde_json::to_value(&part).map_err(|_| R2Error::Internal)?),
                },
            )
            .await?;

        self.wait_for_open().await;
        Ok(UploadedPart { part_number, etag })
    }

    /// Assemble `parts` (in the order given — not part-number order) into a
    /// single committed object. Size rules are evaluated in the same
    /// provided order (spec §9, §8 scenario 5).
    pub async fn complete(&self, parts: Vec<UploadedPart>) -> Result<ObjectRecord, R2Error> {
        let mut index = self.load_index().await?;
        if index.state != UploadState::InProgress {
            return Err(R2Error::Internal);
        }

        let mut seen = std::collections::HashSet::new();
        for p in &parts {
            if !seen.insert(p.part_number) {
                return Err(R2Error::Internal);
            }
        }

        let mut records = Vec::with_capacity(parts.len());
        for p in &parts {
            let stored = self
                .storage
                .get(&self.part_key(p.part_number))
                .await?
                .ok_or(R2Error::PartsNotFound)?;
            let metadata = stored.meta.metadata.clone().ok_or(R2Error::PartsNotFound)?;
            let record: PartRecord =
                serde_json::from_value(metadata).map_err(|_| R2Error::PartsNotFound)?;
            if record.etag != p.etag {
                // The part was overwritten by a later uploadPart call with
                // the same number, producing a new etag (spec §4.12).
                return Err(R2Error::PartsNotFound);
            }
            records.push((record, stored.bytes));
        }

        if !records.is_empty() {
            let last_idx = records.len() - 1;
            for (i, (record, _)) in records.iter().enumerate() {
                if i == last_idx {
                    let reference_size = records[0].0.size;
                    if records.len() > 1 && record.size > reference_size {
                        return Err(R2Error::SizeRule);
                    }
                    continue;
                }
                if record.size < self.min_multipart_upload_size {
                    return Err(R2Error::SizeRule);
                }
                if i > 0 && record.size != records[0].0.size {
                    return Err(R2Error::SizeRule);
                }
            }
        }

        // Size rules are checked in the order the caller supplied the parts
        // list (above), but the assembled body is always ordered by
        // ascending part number regardless of that order (spec §8 scenario
        // 5).
        let mut by_part_number = records.iter().collect::<Vec<_>>();
        by_part_number.sort_by_key(|(record, _)| record.part_number);

        let mut body = BytesMut::new();
        let mut md5_concat = Vec::with_capacity(records.len() * 16);
        for (record, bytes) in &by_part_number {
            body.extend_from_slice(bytes);
            let raw: [u8; 16] = record
                .md5_raw
                .as_slice()
                .try_into()
                .map_err(|_| R2Error::Internal)?;
            md5_concat.extend_from_slice(&raw);
        }

        let composite_md5 = hex::encode(Md5::digest(&md5_concat));
        let etag = format!("{composite_md5}-{}", records.len());

        let body = body.freeze();
        let object = ObjectRecord {
            key: self.key.clone(),
            version: new_version(self.clock.as_ref()),
            size: body.len() as u64,
            etag: etag.clone(),
            http_etag: format!("\"{etag}\""),
            uploaded: self.clock.now_ms(),
            http_metadata: index.http_metadata.clone(),
            custom_metadata: std::mem::take(&mut index.custom_metadata),
            checksums: HashMap::from([("md5".to_string(), etag)]),
        };

        let storage = self.storage.clone();
        let key = self.key.clone();
        let record_json = serde_json::to_value(&object).map_err(|_| R2Error::Internal)?;
        let write = async move {
            let _ = storage
                .put(
                    &key,
                    body,
                    StoredMeta {
                        expiration: None,
                        metadata: Some(record_json),
                    },
                )
                .await;
        };

        if let Some(ctx) = crate::context::current() {
            ctx.output_gate.wait_until(write);
            ctx.output_gate.wait_for_open_output().await;
        } else {
            write.await;
        }

        index.state = UploadState::Completed;
        self.storage
            .put(
                &self.index_key(),
                Bytes::new(),
                StoredMeta {
                    expiration: None,
                    metadata: Some(serde_json::to_value(&index).map_err(|_| R2Error::Internal)?),
                },
            )
            .await?;
        for p in &parts {
            self.storage.delete(&self.part_key(p.part_number)).await?;
        }

        self.wait_for_open().await;
        Ok(object)
    }

    /// Idempotent: aborting an already aborted/completed upload still
    /// succeeds (spec §4.12).
    pub async fn abort(&self) -> Result<(), R2Error> {
        let mut index = match self.load_index().await {
            Ok(i) => i,
            Err(R2Error::NoSuchUpload) => return Ok(()),
            Err(e) => return Err(e),
        };

        if index.state == UploadState::InProgress {
            index.state = UploadState::Aborted;
            self.storage
                .put(
                    &self.index_key(),
                    Bytes::new(),
                    StoredMeta {
                        expiration: None,
                        metadata: Some(serde_json::to_value(&index).map_err(|_| R2Error::Internal)?),
                    },
                )
                .await?;

            for n in MIN_PART_NUMBER..=MAX_PART_NUMBER {
                let part_key = self.part_key(n);
                if self.storage.has(&part_key).await? {
                    self.storage.delete(&part_key).await?;
                } else if n > MIN_PART_NUMBER + 32 {
                    break;
                }
            }
        }

        self.wait_for_open().await;
        Ok(())
    }
}
