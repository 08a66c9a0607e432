pub mod interactive;
pub mod simple;

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::CopyError;
use crate::progress::ProgressReporter;

pub use interactive::{CommandHostCopy, HostCopy, HostCopyOutcome, InteractiveCopier};
pub use simple::SimpleCopier;

/// Moves a file or directory tree from a source into a destination directory.
///
/// The source lands at `dest_dir/<source file name>`. Existing files are
/// overwritten. When `progress` is `Some`, snapshots are published while the
/// copy runs and a final 100% snapshot is published on success.
///
/// On failure or cancellation, whatever was partially written at the
/// destination is removed before the error is returned.
#[async_trait::async_trait]
pub trait Copier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Copy `source` into `dest_dir`, returning the number of bytes copied.
    async fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError>;
}

#[async_trait::async_trait]
impl<T: Copier + ?Sized> Copier for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError> {
        (**self).copy(source, dest_dir, progress, cancel).await
    }
}

/// Which copier an import should run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyStrategy {
    /// Silent in-process byte copy.
    #[default]
    Simple,
    /// Host-native copy the user can watch and dismiss.
    Interactive,
}

impl CopyStrategy {
    pub fn from_show_progress(show_progress: bool) -> Self {
        if show_progress {
            Self::Interactive
        } else {
            Self::Simple
        }
    }
}

/// Whether a path is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Directory,
}

impl SourceKind {
    /// Stat `path`; `None` if it is missing or neither a file nor a directory.
    pub async fn probe(path: &Path) -> Option<Self> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        if meta.is_file() {
            Some(Self::File)
        } else if meta.is_dir() {
            Some(Self::Directory)
        } else {
            None
        }
    }
}

/// Check copier preconditions and compute where the source will land.
pub(crate) async fn prepare(
    source: &Path,
    dest_dir: &Path,
) -> Result<(SourceKind, PathBuf), CopyError> {
    let kind = SourceKind::probe(source).await.ok_or_else(|| {
        CopyError::InvalidInput(format!(
            "source is not a file or directory: {}",
            source.display()
        ))
    })?;

    if dest_dir.as_os_str().is_empty() {
        return Err(CopyError::InvalidInput(
            "destination directory is empty".into(),
        ));
    }
    if tokio::fs::metadata(dest_dir)
        .await
        .is_ok_and(|meta| !meta.is_dir())
    {
        return Err(CopyError::InvalidInput(format!(
            "destination is not a directory: {}",
            dest_dir.display()
        )));
    }

    let name = source.file_name().ok_or_else(|| {
        CopyError::InvalidInput(format!("source has no file name: {}", source.display()))
    })?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| CopyError::io(format!("creating {}", dest_dir.display()), e))?;

    Ok((kind, dest_dir.join(name)))
}

/// Total size in bytes of a file, or of every file under a directory.
/// Unreadable entries count as zero.
pub fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// [`tree_size`] off the async runtime.
pub async fn tree_size_async(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || tree_size(&path))
        .await
        .unwrap_or(0)
}

/// Best-effort removal of a partially written copy. Failures are logged.
pub async fn remove_partial(path: &Path) {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial copy");
    }
}
