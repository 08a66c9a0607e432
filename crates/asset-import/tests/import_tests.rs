use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use asset_import::{
    AssetManager, CancellationToken, CopyError, CopyStrategy, HostCopy, HostCopyOutcome,
    ImportError, ImportRequest, ImportSettings, InteractiveCopier, SourceKey,
};

fn settings(root: &Path) -> ImportSettings {
    ImportSettings {
        temp_root: Some(root.join("tmp")),
        retry_delay_ms: 1,
        ..Default::default()
    }
}

fn game_disc(root: &Path) -> PathBuf {
    let disc = root.join("share").join("Unreal Tournament");
    std::fs::create_dir_all(disc.join("System")).unwrap();
    std::fs::create_dir_all(disc.join("Maps")).unwrap();
    std::fs::write(disc.join("Setup.exe"), vec![0x4d; 1500]).unwrap();
    std::fs::write(disc.join("System/UnrealTournament.ini"), b"[Engine]\n").unwrap();
    std::fs::write(disc.join("Maps/DM-Deck16.unr"), vec![7u8; 70_000]).unwrap();
    disc
}

#[tokio::test]
async fn directory_import_mirrors_the_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let disc = game_disc(tmp.path());
    let manager = AssetManager::new(settings(tmp.path())).unwrap();

    let outcome = manager.import(ImportRequest::new(&disc)).await.unwrap();

    assert_eq!(outcome.path.file_name().unwrap(), "Unreal Tournament");
    assert_eq!(outcome.bytes_copied, 1500 + 9 + 70_000);
    assert_eq!(
        std::fs::read(outcome.path.join("Maps/DM-Deck16.unr")).unwrap(),
        vec![7u8; 70_000]
    );
    assert_eq!(
        manager.registry().lookup(&SourceKey::for_path(&disc)),
        Some(outcome.path.clone())
    );
}

#[tokio::test]
async fn uncached_imports_go_to_scratch_and_never_hit() {
    let tmp = tempfile::tempdir().unwrap();
    let disc = game_disc(tmp.path());
    let manager = AssetManager::new(ImportSettings {
        cache_enabled: false,
        ..settings(tmp.path())
    })
    .unwrap();

    let first = manager.import(ImportRequest::new(&disc)).await.unwrap();
    let second = manager.import(ImportRequest::new(&disc)).await.unwrap();

    assert!(!second.cache_hit);
    assert_ne!(first.path, second.path);
    assert!(first.path.starts_with(tmp.path().join("tmp/Assets")));
    assert!(manager.registry().entries().is_empty());

    for outcome in [first, second] {
        assert!(manager.cleanup(&outcome.path).await.unwrap());
        assert!(!outcome.path.exists());
    }
}

/// A host copy that never finishes on its own and reports dismissal once
/// its "dialog" is closed via the shared token.
struct DialogHost {
    closed: CancellationToken,
}

#[async_trait::async_trait]
impl HostCopy for DialogHost {
    async fn run(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<HostCopyOutcome, CopyError> {
        let target = dest_dir.join(source.file_name().unwrap());
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("half-written.bin"), b"..").unwrap();
        tokio::select! {
            _ = self.closed.cancelled() => Ok(HostCopyOutcome::Dismissed),
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
        }
    }
}

#[tokio::test]
async fn dismissing_the_host_dialog_cancels_without_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let disc = game_disc(tmp.path());
    let closed = CancellationToken::new();
    let host = Arc::new(DialogHost {
        closed: closed.clone(),
    });
    let manager = Arc::new(
        AssetManager::new(settings(tmp.path()))
            .unwrap()
            .with_copier(
                CopyStrategy::Interactive,
                Arc::new(InteractiveCopier::new(host)),
            ),
    );

    let task = {
        let manager = Arc::clone(&manager);
        let disc = disc.clone();
        tokio::spawn(async move {
            manager
                .import(ImportRequest::new(disc).show_progress(true))
                .await
        })
    };

    let temp_dir = loop {
        if let Some(dir) = manager.in_flight(&disc) {
            break dir;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    closed.cancel();

    let result = task.await.unwrap();
    assert_eq!(result, Err(ImportError::Cancelled));
    assert!(!temp_dir.exists());
    assert!(manager.registry().entries().is_empty());
}

#[tokio::test]
async fn stats_reflect_imported_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let disc = game_disc(tmp.path());
    let manager = AssetManager::new(settings(tmp.path())).unwrap();

    manager.import(ImportRequest::new(&disc)).await.unwrap();
    let stats = manager.cache_stats().await;

    assert_eq!(stats.item_count, 1);
    assert!(stats.total_bytes >= 71_509);

    manager.clear_cache().await.unwrap();
    assert_eq!(manager.cache_stats().await.total_bytes, 0);
}

#[tokio::test]
async fn pre_cancelled_request_copies_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let disc = game_disc(tmp.path());
    let manager = AssetManager::new(settings(tmp.path())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = manager
        .import(ImportRequest::new(&disc).with_cancel(cancel))
        .await;
    assert_eq!(result, Err(ImportError::Cancelled));
    assert_eq!(manager.cache_stats().await.total_bytes, 0);
}
