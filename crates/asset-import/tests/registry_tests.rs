use std::path::{Path, PathBuf};
use std::sync::Arc;

use asset_import::registry::REGISTRY_FILE;
use asset_import::{AssetCacheRegistry, CacheStats, SourceKey};

fn key(s: &str) -> SourceKey {
    SourceKey::for_path(Path::new(s))
}

fn cached_dir(root: &Path, id: &str, bytes: usize) -> PathBuf {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("payload.bin"), vec![0u8; bytes]).unwrap();
    dir.join("payload.bin")
}

#[tokio::test]
async fn entries_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("AssetCache");

    let target = {
        let registry = AssetCacheRegistry::open(&root).unwrap();
        let target = cached_dir(&root, "one", 10);
        registry
            .register(key("/nas/Doom"), target.clone())
            .await
            .unwrap();
        target
    };

    let reopened = AssetCacheRegistry::open(&root).unwrap();
    assert_eq!(reopened.lookup(&key("/nas/Doom")), Some(target));
}

#[tokio::test]
async fn reopen_drops_entries_whose_targets_vanished() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("AssetCache");

    {
        let registry = AssetCacheRegistry::open(&root).unwrap();
        let kept = cached_dir(&root, "kept", 10);
        let gone = cached_dir(&root, "gone", 10);
        registry.register(key("/nas/kept"), kept).await.unwrap();
        registry.register(key("/nas/gone"), gone).await.unwrap();
    }
    std::fs::remove_dir_all(root.join("gone")).unwrap();

    let reopened = AssetCacheRegistry::open(&root).unwrap();
    let entries = reopened.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, key("/nas/kept"));
    assert_eq!(reopened.lookup(&key("/nas/gone")), None);
}

#[tokio::test]
async fn clear_removes_subdirectories_registry_and_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("AssetCache");
    let registry = AssetCacheRegistry::open(&root).unwrap();

    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        let target = cached_dir(&root, id, 100 * (i + 1));
        registry
            .register(key(&format!("/nas/{id}")), target)
            .await
            .unwrap();
    }
    assert!(root.join(REGISTRY_FILE).exists());

    registry.clear().await.unwrap();

    assert_eq!(registry.stats().await, CacheStats::default());
    assert!(registry.entries().is_empty());
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}

#[tokio::test]
async fn clear_on_empty_cache_is_fine() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = AssetCacheRegistry::open(tmp.path().join("AssetCache")).unwrap();
    registry.clear().await.unwrap();
    registry.clear().await.unwrap();
    assert_eq!(registry.stats().await.item_count, 0);
}

#[tokio::test]
async fn item_count_tracks_memory_not_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("AssetCache");
    let registry = AssetCacheRegistry::open(&root).unwrap();
    let target = cached_dir(&root, "x", 10);
    registry.register(key("/nas/x"), target).await.unwrap();

    std::fs::remove_dir_all(root.join("x")).unwrap();

    // Still counted until the next reopen.
    assert_eq!(registry.stats().await.item_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_all_land_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("AssetCache");
    let registry = Arc::new(AssetCacheRegistry::open(&root).unwrap());

    let mut tasks = Vec::new();
    for i in 0..16 {
        let registry = Arc::clone(&registry);
        let target = cached_dir(&root, &format!("id{i}"), 1);
        tasks.push(tokio::spawn(async move {
            registry
                .register(key(&format!("/nas/game{i}")), target)
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let on_disk: std::collections::HashMap<String, String> =
        serde_json::from_slice(&std::fs::read(root.join(REGISTRY_FILE)).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 16);
    assert_eq!(AssetCacheRegistry::open(&root).unwrap().entries().len(), 16);
}
