use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{Copier, SourceKind, prepare, remove_partial};
use crate::error::CopyError;
use crate::progress::{CopyProgress, ProgressReporter};

/// Default streaming buffer: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// In-process byte-stream copier that generates its own progress.
#[derive(Debug, Clone)]
pub struct SimpleCopier {
    buffer_size: usize,
}

impl SimpleCopier {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl Default for SimpleCopier {
    fn default() -> Self {
        Self::new()
    }
}

/// Running byte counters for one copy.
struct Tally<'a> {
    copied: u64,
    total: u64,
    started: Instant,
    progress: Option<&'a ProgressReporter>,
}

impl Tally<'_> {
    fn advance(&mut self, bytes: usize) {
        self.copied += bytes as u64;
        if let Some(progress) = self.progress {
            progress.report(CopyProgress::measure(
                self.copied,
                self.total,
                self.started.elapsed(),
            ));
        }
    }
}

/// Files and directories of a tree, in depth-first order.
struct TreePlan {
    dirs: Vec<PathBuf>,
    files: Vec<(PathBuf, u64)>,
}

fn plan_tree(root: &Path) -> Result<TreePlan, CopyError> {
    let mut plan = TreePlan {
        dirs: Vec::new(),
        files: Vec::new(),
    };
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| CopyError::Io(format!("scanning {}: {e}", root.display())))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| CopyError::Io(e.to_string()))?
            .to_path_buf();
        if entry.file_type().is_dir() {
            plan.dirs.push(relative);
        } else if entry.file_type().is_file() {
            let len = entry
                .metadata()
                .map_err(|e| CopyError::Io(format!("stat {}: {e}", entry.path().display())))?
                .len();
            plan.files.push((relative, len));
        }
    }
    Ok(plan)
}

impl SimpleCopier {
    async fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        tally: &mut Tally<'_>,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<(), CopyError> {
        let mut reader = File::open(src)
            .await
            .map_err(|e| CopyError::io(format!("opening {}", src.display()), e))?;
        let mut writer = File::create(dst)
            .await
            .map_err(|e| CopyError::io(format!("creating {}", dst.display()), e))?;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CopyError::Cancelled),
                read = reader.read(buf) => {
                    read.map_err(|e| CopyError::io(format!("reading {}", src.display()), e))?
                }
            };
            if read == 0 {
                break;
            }
            writer
                .write_all(&buf[..read])
                .await
                .map_err(|e| CopyError::io(format!("writing {}", dst.display()), e))?;
            tally.advance(read);
        }

        writer
            .flush()
            .await
            .map_err(|e| CopyError::io(format!("flushing {}", dst.display()), e))?;
        Ok(())
    }

    async fn copy_into(
        &self,
        kind: SourceKind,
        source: &Path,
        target: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError> {
        let mut buf = vec![0u8; self.buffer_size];
        let started = Instant::now();

        match kind {
            SourceKind::File => {
                let total = tokio::fs::metadata(source)
                    .await
                    .map_err(|e| CopyError::io(format!("stat {}", source.display()), e))?
                    .len();
                let mut tally = Tally {
                    copied: 0,
                    total,
                    started,
                    progress,
                };
                self.copy_file(source, target, &mut tally, &mut buf, cancel)
                    .await?;
                Ok(tally.copied)
            }
            SourceKind::Directory => {
                let root = source.to_path_buf();
                let plan = tokio::task::spawn_blocking(move || plan_tree(&root))
                    .await
                    .map_err(|e| CopyError::Io(format!("scan task failed: {e}")))??;

                let mut tally = Tally {
                    copied: 0,
                    total: plan.files.iter().map(|(_, len)| len).sum(),
                    started,
                    progress,
                };

                for dir in &plan.dirs {
                    let dst = target.join(dir);
                    tokio::fs::create_dir_all(&dst)
                        .await
                        .map_err(|e| CopyError::io(format!("creating {}", dst.display()), e))?;
                }
                for (relative, _) in &plan.files {
                    if cancel.is_cancelled() {
                        return Err(CopyError::Cancelled);
                    }
                    self.copy_file(
                        &source.join(relative),
                        &target.join(relative),
                        &mut tally,
                        &mut buf,
                        cancel,
                    )
                    .await?;
                }
                Ok(tally.copied)
            }
        }
    }
}

#[async_trait::async_trait]
impl Copier for SimpleCopier {
    fn name(&self) -> &str {
        "simple"
    }

    async fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError> {
        let (kind, target) = prepare(source, dest_dir).await?;
        let started = Instant::now();
        tracing::debug!(source = %source.display(), target = %target.display(), "simple copy");

        match self.copy_into(kind, source, &target, progress, cancel).await {
            Ok(bytes) => {
                if let Some(progress) = progress {
                    progress.finish(bytes, started.elapsed());
                }
                Ok(bytes)
            }
            Err(e) => {
                remove_partial(&target).await;
                Err(e)
            }
        }
    }
}
