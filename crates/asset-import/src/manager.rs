use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::confirm::ConfirmPrompt;
use crate::copier::{
    CommandHostCopy, Copier, CopyStrategy, InteractiveCopier, SimpleCopier, SourceKind,
    remove_partial,
};
use crate::error::ImportError;
use crate::key::SourceKey;
use crate::progress::{CopyProgress, ProgressReporter};
use crate::registry::{AssetCacheRegistry, CacheStats};
use crate::settings::ImportSettings;

/// Snapshots buffered per progress subscriber before it starts lagging.
const PROGRESS_CAPACITY: usize = 64;

/// A request to bring a source file or directory into local scratch space.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: PathBuf,
    pub strategy: CopyStrategy,
    pub cancel: CancellationToken,
}

impl ImportRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            strategy: CopyStrategy::Simple,
            cancel: CancellationToken::new(),
        }
    }

    /// Use the host-native copier so the user sees the transfer.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.strategy = CopyStrategy::from_show_progress(show);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A successful import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Local copy of the source: `<temp dir>/<source file name>`.
    pub path: PathBuf,
    /// Bytes physically copied. Zero on a cache hit.
    pub bytes_copied: u64,
    pub cache_hit: bool,
    /// Copy attempts made. Zero on a cache hit.
    pub attempts: u32,
}

pub type ImportResult = Result<ImportOutcome, ImportError>;

/// Flattened record of an import, for hosts that want a single shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub success: bool,
    pub path: Option<PathBuf>,
    pub error: Option<ImportError>,
    pub bytes_copied: u64,
    pub cache_hit: bool,
}

impl From<&ImportResult> for ImportReport {
    fn from(result: &ImportResult) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                path: Some(outcome.path.clone()),
                error: None,
                bytes_copied: outcome.bytes_copied,
                cache_hit: outcome.cache_hit,
            },
            Err(e) => Self {
                success: false,
                path: None,
                error: Some(e.clone()),
                bytes_copied: 0,
                cache_hit: false,
            },
        }
    }
}

/// How the leader of an in-flight import finished, as seen by waiters.
type LeaderExit = Option<Result<(), ImportError>>;

/// Marker for an import currently copying.
struct ActiveImport {
    destination: PathBuf,
    done: watch::Receiver<LeaderExit>,
}

type ActiveMap = Arc<Mutex<HashMap<SourceKey, ActiveImport>>>;

/// Held by the caller doing the copy. Dropping it releases the marker.
///
/// A guard dropped without [`finish`](Self::finish) belongs to an import
/// whose future was abandoned mid-copy; its temp directory is removed.
struct ActiveGuard {
    active: ActiveMap,
    key: SourceKey,
    destination: PathBuf,
    done: watch::Sender<LeaderExit>,
    finished: bool,
}

impl ActiveGuard {
    fn finish(mut self, result: &ImportResult) {
        let exit = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.done.send_replace(Some(exit));
        self.finished = true;
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if !self.finished {
            match std::fs::remove_dir_all(&self.destination) {
                Ok(()) => tracing::debug!(
                    key = %self.key,
                    path = %self.destination.display(),
                    "removed temp dir of abandoned import"
                ),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    key = %self.key,
                    path = %self.destination.display(),
                    error = %e,
                    "failed to remove temp dir of abandoned import"
                ),
            }
        }
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

enum Claim {
    Leader(ActiveGuard),
    Waiter(watch::Receiver<LeaderExit>),
}

/// Imports assets into local scratch space, caching and verifying them.
///
/// One instance is built at host startup and shared (e.g. in an `Arc`).
/// Imports of different sources run concurrently. A second import of a
/// source that is already copying waits for the first, then re-checks the
/// cache, so the same source is never copied twice at once.
pub struct AssetManager {
    settings: ImportSettings,
    registry: AssetCacheRegistry,
    simple: Arc<dyn Copier>,
    interactive: Arc<dyn Copier>,
    prompt: Option<Arc<dyn ConfirmPrompt>>,
    progress: broadcast::Sender<CopyProgress>,
    active: ActiveMap,
}

impl AssetManager {
    /// Open the cache under `settings.cache_root()` and wire the default copiers.
    pub fn new(settings: ImportSettings) -> Result<Self, ImportError> {
        let registry = AssetCacheRegistry::open(settings.cache_root())
            .map_err(|e| ImportError::Io(format!("opening asset cache: {e}")))?;

        let host = match &settings.host_copy_command {
            Some(argv) => CommandHostCopy::new(argv.clone()),
            None => CommandHostCopy::system_default(),
        };
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);

        Ok(Self {
            settings,
            registry,
            simple: Arc::new(SimpleCopier::new()),
            interactive: Arc::new(InteractiveCopier::new(Arc::new(host))),
            prompt: None,
            progress,
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Replace the copier used for a strategy.
    pub fn with_copier(mut self, strategy: CopyStrategy, copier: Arc<dyn Copier>) -> Self {
        match strategy {
            CopyStrategy::Simple => self.simple = copier,
            CopyStrategy::Interactive => self.interactive = copier,
        }
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConfirmPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn registry(&self) -> &AssetCacheRegistry {
        &self.registry
    }

    /// Progress snapshots of every copy this manager runs.
    pub fn subscribe(&self) -> broadcast::Receiver<CopyProgress> {
        self.progress.subscribe()
    }

    /// Temp directory of the in-flight import of `source`, if one is running.
    pub fn in_flight(&self, source: &Path) -> Option<PathBuf> {
        let key = SourceKey::for_path(source);
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .map(|a| a.destination.clone())
    }

    pub async fn import(&self, request: ImportRequest) -> ImportResult {
        if request.source.as_os_str().is_empty() {
            return Err(ImportError::InvalidInput("source path is empty".into()));
        }
        let key = SourceKey::for_path(&request.source);

        loop {
            if let Some(hit) = self.cached(&key) {
                tracing::debug!(%key, path = %hit.path.display(), "asset cache hit");
                return Ok(hit);
            }

            let dest_dir = self.fresh_temp_dir();
            match self.claim(&key, &dest_dir) {
                Claim::Leader(guard) => {
                    let result = self.import_claimed(&request, &key, &dest_dir).await;
                    guard.finish(&result);
                    return result;
                }
                Claim::Waiter(done) => {
                    tracing::debug!(%key, source = %request.source.display(), "waiting for in-flight import");
                    self.wait_for_leader(done, &request.cancel).await?;
                }
            }
        }
    }

    /// Delete a path returned by [`import`](Self::import) together with its
    /// temp directory.
    ///
    /// Returns `Ok(false)` without touching anything when the path lives in
    /// the cache and caching is on; cached assets only go away via
    /// [`clear_cache`](Self::clear_cache). Paths outside the scratch root
    /// (or the cache root, with caching off) are rejected as `InvalidInput`.
    pub async fn cleanup(&self, path: &Path) -> Result<bool, ImportError> {
        if path.as_os_str().is_empty() {
            return Err(ImportError::InvalidInput("cleanup path is empty".into()));
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ImportError::InvalidInput(format!(
                "cleanup path {} must not contain `..`",
                path.display()
            )));
        }

        let cache = self.registry.root();
        if self.settings.cache_enabled && path.starts_with(cache) {
            tracing::debug!(path = %path.display(), "not cleaning up cached asset");
            return Ok(false);
        }

        let scratch = self.settings.scratch_root();
        let Some(root) = [scratch.as_path(), cache]
            .into_iter()
            .find(|root| path.starts_with(root) && path != *root)
        else {
            return Err(ImportError::InvalidInput(format!(
                "{} is not an imported asset",
                path.display()
            )));
        };

        remove_path(path).await?;

        if let Some(parent) = path.parent()
            && parent.parent() == Some(root)
        {
            remove_path(parent).await?;
        }
        Ok(true)
    }

    pub async fn clear_cache(&self) -> Result<(), ImportError> {
        self.registry
            .clear()
            .await
            .map_err(|e| ImportError::Io(format!("clearing asset cache: {e}")))
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.registry.stats().await
    }

    fn cached(&self, key: &SourceKey) -> Option<ImportOutcome> {
        if !self.settings.cache_enabled {
            return None;
        }
        let path = self.registry.lookup(key)?;
        if !path.exists() {
            tracing::debug!(%key, path = %path.display(), "cached asset is gone, importing again");
            return None;
        }
        Some(ImportOutcome {
            path,
            bytes_copied: 0,
            cache_hit: true,
            attempts: 0,
        })
    }

    fn fresh_temp_dir(&self) -> PathBuf {
        let base = if self.settings.cache_enabled {
            self.registry.root().to_path_buf()
        } else {
            self.settings.scratch_root()
        };
        base.join(uuid::Uuid::new_v4().simple().to_string())
    }

    fn claim(&self, key: &SourceKey, dest_dir: &Path) -> Claim {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = active.get(key) {
            return Claim::Waiter(existing.done.clone());
        }
        let (tx, rx) = watch::channel(None);
        active.insert(
            key.clone(),
            ActiveImport {
                destination: dest_dir.to_path_buf(),
                done: rx,
            },
        );
        Claim::Leader(ActiveGuard {
            active: Arc::clone(&self.active),
            key: key.clone(),
            destination: dest_dir.to_path_buf(),
            done: tx,
            finished: false,
        })
    }

    /// Returns `Ok(())` when the caller should re-check the cache and try
    /// again: the leader succeeded, was cancelled, or vanished.
    async fn wait_for_leader(
        &self,
        mut done: watch::Receiver<LeaderExit>,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        let leader_exit = async {
            match done.wait_for(Option::is_some).await {
                Ok(exit) => exit.clone(),
                Err(_) => None,
            }
        };
        let exit = tokio::select! {
            _ = cancel.cancelled() => return Err(ImportError::Cancelled),
            exit = leader_exit => exit,
        };
        match exit {
            Some(Err(e)) if !e.is_cancelled() => Err(e),
            _ => Ok(()),
        }
    }

    async fn import_claimed(
        &self,
        request: &ImportRequest,
        key: &SourceKey,
        dest_dir: &Path,
    ) -> ImportResult {
        let source = request.source.as_path();
        let Some(name) = source.file_name() else {
            return Err(ImportError::InvalidInput(format!(
                "source {} has no file name",
                source.display()
            )));
        };
        let target = dest_dir.join(name);

        let kind = SourceKind::probe(source)
            .await
            .ok_or_else(|| ImportError::NotFound(source.to_path_buf()))?;

        if kind == SourceKind::File {
            self.confirm_large_file(source).await?;
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ImportError::Io(format!("creating {}: {e}", dest_dir.display())))?;

        let copied = self.copy_with_retries(request, kind, dest_dir, &target).await;
        let (bytes, attempts) = match copied {
            Ok(done) => done,
            Err(e) => {
                remove_partial(dest_dir).await;
                return Err(e);
            }
        };

        if self.settings.cache_enabled
            && let Err(e) = self.registry.register(key.clone(), target.clone()).await
        {
            tracing::warn!(%key, error = %e, "failed to record asset in cache registry");
        }

        tracing::info!(
            %key,
            source = %source.display(),
            path = %target.display(),
            bytes,
            attempts,
            "asset imported"
        );
        Ok(ImportOutcome {
            path: target,
            bytes_copied: bytes,
            cache_hit: false,
            attempts,
        })
    }

    async fn confirm_large_file(&self, source: &Path) -> Result<(), ImportError> {
        let Some(threshold) = self.settings.large_file_threshold_bytes() else {
            return Ok(());
        };
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| ImportError::Io(format!("stat {}: {e}", source.display())))?
            .len();
        if size <= threshold {
            return Ok(());
        }
        let Some(prompt) = self.prompt.clone() else {
            tracing::debug!(source = %source.display(), size, "large file, no prompt configured");
            return Ok(());
        };

        let path = source.to_path_buf();
        let accepted = tokio::task::spawn_blocking(move || prompt.confirm_large_file(&path, size))
            .await
            .unwrap_or(false);
        if accepted {
            Ok(())
        } else {
            tracing::info!(source = %source.display(), size, "large file import declined");
            Err(ImportError::Cancelled)
        }
    }

    async fn copy_with_retries(
        &self,
        request: &ImportRequest,
        kind: SourceKind,
        dest_dir: &Path,
        target: &Path,
    ) -> Result<(u64, u32), ImportError> {
        let copier = match request.strategy {
            CopyStrategy::Simple => &self.simple,
            CopyStrategy::Interactive => &self.interactive,
        };
        let max_attempts = self.settings.retry_attempts.saturating_add(1);
        let cancel = &request.cancel;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            tracing::debug!(
                source = %request.source.display(),
                copier = copier.name(),
                attempt,
                "copy attempt"
            );
            let error = match self
                .attempt(&**copier, request, kind, dest_dir, target)
                .await {
                Ok(bytes) => return Ok((bytes, attempt)),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= max_attempts {
                return Err(ImportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            tracing::warn!(
                source = %request.source.display(),
                attempt,
                error = %error,
                "import attempt failed, retrying"
            );
            reset_dir(dest_dir).await?;

            tokio::select! {
                _ = cancel.cancelled() => return Err(ImportError::Cancelled),
                _ = tokio::time::sleep(self.settings.retry_delay(attempt)) => {}
            }
        }
    }

    async fn attempt(
        &self,
        copier: &dyn Copier,
        request: &ImportRequest,
        kind: SourceKind,
        dest_dir: &Path,
        target: &Path,
    ) -> Result<u64, ImportError> {
        let reporter = ProgressReporter::new(self.progress.clone());
        let bytes = copier
            .copy(&request.source, dest_dir, Some(&reporter), &request.cancel)
            .await?;

        if self.settings.verify_on_import && kind == SourceKind::File {
            self.verify_file(&request.source, target).await?;
        }
        Ok(bytes)
    }

    async fn verify_file(&self, source: &Path, copy: &Path) -> Result<(), ImportError> {
        let source_len = file_len(source).await?;
        let copy_len = file_len(copy).await?;
        if source_len != copy_len {
            return Err(ImportError::VerificationFailed(format!(
                "size mismatch: source is {source_len} bytes, copy is {copy_len} bytes"
            )));
        }

        if source_len < self.settings.digest_ceiling_bytes() {
            let (a, b) = tokio::join!(file_digest(source), file_digest(copy));
            if a? != b? {
                return Err(ImportError::VerificationFailed(format!(
                    "content digest mismatch for {}",
                    copy.display()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("simple", &self.simple.name())
            .field("interactive", &self.interactive.name())
            .finish_non_exhaustive()
    }
}

async fn file_len(path: &Path) -> Result<u64, ImportError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| ImportError::VerificationFailed(format!("stat {}: {e}", path.display())))
}

async fn file_digest(path: &Path) -> Result<String, ImportError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| ImportError::Io(format!("digest task failed: {e}")))?
    .map_err(|e| ImportError::Io(format!("hashing: {e}")))
}

/// Empty a temp directory between attempts.
async fn reset_dir(dir: &Path) -> Result<(), ImportError> {
    remove_partial(dir).await;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ImportError::Io(format!("recreating {}: {e}", dir.display())))
}

async fn remove_path(path: &Path) -> Result<(), ImportError> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ImportError::Io(format!("removing {}: {e}", path.display()))),
    }
}
