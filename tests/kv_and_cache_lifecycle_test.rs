//! End-to-end lifecycle tests for the KV (C10) and HTTP cache (C11) engines
//! running against both storage backends, exercising put → expire → list and
//! put → match → delete flows the way a worker binding would actually use
//! them.

use bytes::Bytes;
use edgestore_core::clock::manual;
use edgestore_core::kv::{KvNamespace, KvType, PutOptions};
use edgestore_core::storage::{FileStorage, MemoryStorage, Storage};
use edgestore_core::{Cache, cache::{CacheRequest, CacheResponse}};
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn kv_put_expire_list_round_trip_on_memory() {
    let clock = manual(0);
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(clock.clone()));
    let kv = KvNamespace::new(storage, clock.clone());

    kv.put("session:1", Bytes::from_static(b"alive"), PutOptions {
        expiration_ttl: Some(30),
        ..Default::default()
    })
    .await
    .unwrap();
    kv.put("session:2", Bytes::from_static(b"also-alive"), PutOptions::default())
        .await
        .unwrap();

    let page = kv.list(Some("session:".into()), None, None).await.unwrap();
    assert_eq!(page.keys.len(), 2);
    assert!(page.list_complete);

    clock.set(30_000);
    assert!(kv.get("session:1", KvType::Text).await.unwrap().is_none());
    let page = kv.list(Some("session:".into()), None, None).await.unwrap();
    assert_eq!(page.keys.len(), 1);
    assert_eq!(page.keys[0].name, "session:2");
}

#[tokio::test]
async fn kv_put_expire_list_round_trip_on_file_backend() {
    let dir = tempdir().unwrap();
    let clock = manual(0);
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path(), clock.clone()));
    let kv = KvNamespace::new(storage, clock.clone());

    kv.put("a", Bytes::from_static(b"1"), PutOptions { expiration_ttl: Some(5), ..Default::default() })
        .await
        .unwrap();
    kv.put("b", Bytes::from_static(b"2"), PutOptions::default()).await.unwrap();

    clock.set(5_000);
    let page = kv.list(None, None, None).await.unwrap();
    assert_eq!(page.keys.len(), 1);
    assert_eq!(page.keys[0].name, "b");
}

#[tokio::test]
async fn cache_and_kv_namespace_can_share_one_backend_without_key_collisions() {
    // A cache and a KV namespace wrapping the same storage must not step on
    // each other: the cache sanitizes its URL into a storage key, so a KV
    // key chosen to literally equal the raw URL stays distinct from it.
    let clock = manual(0);
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(clock.clone()));
    let cache = Cache::new(storage.clone(), clock.clone());
    let kv = KvNamespace::new(storage, clock.clone());

    let url = "https://example.com/shared-name";
    let req = CacheRequest { method: "GET".into(), url: url.into() };
    cache
        .put(&req, CacheResponse {
            status: 200,
            headers: vec![("cache-control".into(), "max-age=60".into())],
            body: Bytes::from_static(b"cached body"),
        })
        .await
        .unwrap();

    kv.put(url, Bytes::from_static(b"kv value"), PutOptions::default()).await.unwrap();

    let hit = cache.match_request(&req, false).await.unwrap().unwrap();
    assert_eq!(hit.body, Bytes::from_static(b"cached body"));

    match kv.get(url, KvType::Text).await.unwrap().unwrap() {
        edgestore_core::kv::KvValue::Text(s) => assert_eq!(s, "kv value"),
        other => panic!("unexpected variant: {other:?}"),
    }

    clock.set(60_000);
    assert!(cache.match_request(&req, false).await.unwrap().is_none());
    // The KV entry carries no expiration and survives independently.
    assert!(kv.get(url, KvType::Text).await.unwrap().is_some());
}
