//! Walks a [`FileStorage`] root directly with `walkdir` to confirm the
//! on-disk layout spec.md §4.5 describes: one flat file per sanitized key,
//! sidecars only where sanitization or metadata actually require one, and
//! listing recovers the original, unsanitized key.

use bytes::Bytes;
use edgestore_core::clock::manual;
use edgestore_core::storage::{FileStorage, Storage, StoredMeta};
use walkdir::WalkDir;

fn file_names(root: &std::path::Path) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn plain_keys_produce_exactly_one_flat_file_each() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path(), manual(0));

    storage.put("plain", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();
    storage.put("nested/looking/key", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();

    let names = file_names(dir.path());
    assert_eq!(names.len(), 2, "no directories, no stray sidecars: {names:?}");
    // The slash-bearing key is sanitized into a single flat filename with
    // the slashes replaced, not a nested directory.
    assert!(names.iter().any(|n| n == "nested_looking_key"));
    assert!(names.iter().any(|n| n == "plain"));
    assert_eq!(WalkDir::new(dir.path()).min_depth(1).into_iter().count(), 2);
}

#[tokio::test]
async fn sanitized_key_gets_a_sidecar_and_listing_recovers_the_original_name() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path(), manual(0));

    storage.put("a/b/c", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();

    let names = file_names(dir.path());
    assert!(names.contains(&"a_b_c".to_string()));
    assert!(names.contains(&"a_b_c.meta.json".to_string()));

    let listed = storage.list(Default::default()).await.unwrap();
    assert_eq!(listed.keys.len(), 1);
    assert_eq!(listed.keys[0].name, "a/b/c");
}

#[tokio::test]
async fn reserved_device_name_key_is_sanitized_to_a_distinct_on_disk_file() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path(), manual(0));

    storage.put("CON", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();

    let names = file_names(dir.path());
    assert!(!names.contains(&"CON".to_string()), "reserved device name must not appear bare on disk");
    assert!(names.iter().any(|n| n.starts_with("CON") && n != "CON"));

    let listed = storage.list(Default::default()).await.unwrap();
    assert_eq!(listed.keys[0].name, "CON");
}

#[tokio::test]
async fn unsanitized_keys_have_no_sidecar_until_metadata_is_attached() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path(), manual(0));

    storage.put("plain", Bytes::from_static(b"v"), StoredMeta::default()).await.unwrap();
    assert!(!dir.path().join("plain.meta.json").exists());

    storage
        .put("plain", Bytes::from_static(b"v2"), StoredMeta { expiration: Some(1_000), metadata: None })
        .await
        .unwrap();
    assert!(dir.path().join("plain.meta.json").exists());
}
