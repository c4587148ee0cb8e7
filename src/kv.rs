//! KV namespace engine (C10): a typed, TTL-aware view over a [`Storage`]
//! backend (C3).

use crate::clock::Clock;
use crate::storage::{ListRequest, Storage, StorageError, StoredKeyRecord, StoredMeta};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("KV GET failed: 400 invalid limit: must be between 1 and 1000")]
    InvalidLimit,

    #[error("KV GET failed: 400 cursor is not valid base64")]
    InvalidCursor,

    #[error("KV GET failed: 400 type must be one of \"text\", \"json\", \"arrayBuffer\", \"stream\"")]
    InvalidType,

    #[error("KV GET failed: 400 value is not valid JSON")]
    InvalidJson,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The four accepted `get`/`getWithMetadata` view types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvType {
    Text,
    Json,
    ArrayBuffer,
    Stream,
}

impl KvType {
    pub fn parse(s: &str) -> Result<Self, KvError> {
        match s {
            "text" => Ok(KvType::Text),
            "json" => Ok(KvType::Json),
            "arrayBuffer" => Ok(KvType::ArrayBuffer),
            "stream" => Ok(KvType::Stream),
            _ => Err(KvError::InvalidType),
        }
    }
}

/// A typed view over a stored value, matching the shape `get` returns for
/// each [`KvType`].
#[derive(Debug, Clone)]
pub enum KvValue {
    Text(String),
    Json(Value),
    ArrayBuffer(Bytes),
    /// Streaming values are modeled as already-materialized bytes — this
    /// crate has no network surface to actually stream over, see
    /// SPEC_FULL.md §1. Callers that need a `Stream`-shaped API can wrap
    /// this in a single-chunk stream themselves.
    Stream(Bytes),
}

fn typed_view(bytes: Bytes, ty: KvType) -> Result<KvValue, KvError> {
    Ok(match ty {
        KvType::Text => KvValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        KvType::Json => {
            let value: Value = serde_json::from_slice(&bytes).map_err(|_| KvError::InvalidJson)?;
            KvValue::Json(value)
        }
        KvType::ArrayBuffer => KvValue::ArrayBuffer(bytes),
        KvType::Stream => KvValue::Stream(bytes),
    })
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub expiration: Option<i64>,
    pub expiration_ttl: Option<i64>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct KvListResult {
    pub keys: Vec<StoredKeyRecord>,
    pub list_complete: bool,
    /// Base64-encoded resume cursor; empty when `list_complete`.
    pub cursor: String,
}

/// A single KV namespace, backed by one [`Storage`] instance.
pub struct KvNamespace {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl KvNamespace {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub async fn get(&self, key: &str, ty: KvType) -> Result<Option<KvValue>, KvError> {
        match self.storage.get(key).await? {
            None => Ok(None),
            Some(v) => Ok(Some(typed_view(v.bytes, ty)?)),
        }
    }

    pub async fn get_with_metadata(
        &self,
        key: &str,
        ty: KvType,
    ) -> Result<Option<(KvValue, Option<Value>)>, KvError> {
        match self.storage.get(key).await? {
            None => Ok(None),
            Some(v) => {
                let metadata = v.meta.metadata.clone();
                Ok(Some((typed_view(v.bytes, ty)?, metadata)))
            }
        }
    }

    pub async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), KvError> {
        let expiration = match opts.expiration_ttl {
            Some(ttl) => Some(self.clock.now_secs() + ttl),
            None => opts.expiration,
        };
        self.storage
            .put(
                key,
                value,
                StoredMeta {
                    expiration,
                    metadata: opts.metadata,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.storage.delete(key).await?;
        Ok(())
    }

    pub async fn list(
        &self,
        prefix: Option<String>,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<KvListResult, KvError> {
        let limit = limit.unwrap_or(1000);
        if limit == 0 || limit > 1000 {
            return Err(KvError::InvalidLimit);
        }

        let decoded_cursor = match cursor {
            Some(c) if !c.is_empty() => Some(decode_cursor(&c)?),
            _ => None,
        };

        let result = self
            .storage
            .list(ListRequest {
                prefix,
                limit: Some(limit),
                cursor: decoded_cursor,
                ..Default::default()
            })
            .await?;

        let list_complete = result.cursor.is_empty();
        let cursor = if list_complete {
            String::new()
        } else {
            encode_cursor(&result.cursor)
        };

        Ok(KvListResult {
            keys: result.keys,
            list_complete,
            cursor,
        })
    }
}

fn encode_cursor(name: &str) -> String {
    BASE64.encode(name.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<String, KvError> {
    let bytes = BASE64.decode(cursor).map_err(|_| KvError::InvalidCursor)?;
    String::from_utf8(bytes).map_err(|_| KvError::InvalidCursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual;
    use crate::storage::MemoryStorage;

    fn namespace() -> (KvNamespace, Arc<crate::clock::ManualClock>) {
        let clock = manual(0);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(clock.clone()));
        (KvNamespace::new(storage, clock.clone()), clock)
    }

    #[tokio::test]
    async fn put_then_get_text() {
        let (kv, _clock) = namespace();
        kv.put("k", Bytes::from_static(b"hello"), PutOptions::default()).await.unwrap();
        match kv.get("k", KvType::Text).await.unwrap().unwrap() {
            KvValue::Text(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_json_parses_value() {
        let (kv, _clock) = namespace();
        kv.put("k", Bytes::from_static(br#"{"a":1}"#), PutOptions::default()).await.unwrap();
        match kv.get("k", KvType::Json).await.unwrap().unwrap() {
            KvValue::Json(v) => assert_eq!(v["a"], 1),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_json_rejects_malformed_payload() {
        let (kv, _clock) = namespace();
        kv.put("k", Bytes::from_static(b"not json"), PutOptions::default()).await.unwrap();
        assert!(matches!(kv.get("k", KvType::Json).await, Err(KvError::InvalidJson)));
    }

    #[tokio::test]
    async fn expiration_ttl_computed_from_clock() {
        let (kv, clock) = namespace();
        clock.set(1000);
        kv.put(
            "k",
            Bytes::from_static(b"v"),
            PutOptions { expiration_ttl: Some(60), ..Default::default() },
        )
        .await
        .unwrap();
        let (_, metadata) = kv.get_with_metadata("k", KvType::Text).await.unwrap().unwrap();
        assert!(metadata.is_none());
        // expiration = now_secs() + ttl = 1 + 60 = 61s, i.e. 61_000ms.
        clock.set(61_000 - 1);
        assert!(kv.get("k", KvType::Text).await.unwrap().is_some());
        clock.set(61_000);
        assert!(kv.get("k", KvType::Text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_limit_rejected() {
        let (kv, _clock) = namespace();
        assert!(matches!(kv.list(None, Some(0), None).await, Err(KvError::InvalidLimit)));
    }

    #[tokio::test]
    async fn list_cursor_round_trips_through_base64() {
        let (kv, _clock) = namespace();
        for k in ["a", "b", "c"] {
            kv.put(k, Bytes::new(), PutOptions::default()).await.unwrap();
        }
        let page = kv.list(None, Some(2), None).await.unwrap();
        assert!(!page.list_complete);
        let decoded = decode_cursor(&page.cursor).unwrap();
        assert_eq!(decoded, "b");

        let page2 = kv.list(None, Some(2), Some(page.cursor)).await.unwrap();
        assert!(page2.list_complete);
        assert_eq!(page2.keys.len(), 1);
        assert_eq!(page2.keys[0].name, "c");
    }

    #[tokio::test]
    async fn invalid_cursor_is_rejected() {
        let (kv, _clock) = namespace();
        assert!(matches!(
            kv.list(None, None, Some("not-base64!!".into())).await,
            Err(KvError::InvalidCursor)
        ));
    }
}
