use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::{Copier, prepare, remove_partial, tree_size_async};
use crate::error::CopyError;
use crate::progress::{CopyProgress, PROGRESS_INTERVAL, ProgressReporter};

/// Delay before re-checking a destination that looks complete.
pub const SETTLE_DELAY: Duration = Duration::from_millis(250);

/// How a host-native copy ended, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCopyOutcome {
    Completed,
    /// The user closed the host's copy UI before it finished.
    Dismissed,
}

/// The host operating environment's own copy affordance.
///
/// Implementations copy `source` into `dest_dir` (landing at
/// `dest_dir/<source file name>`) and must stop promptly when `cancel` fires.
#[async_trait::async_trait]
pub trait HostCopy: Send + Sync {
    async fn run(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<HostCopyOutcome, CopyError>;
}

/// Environment variable holding the source path for the host copy command.
pub const SOURCE_ENV: &str = "ASSET_IMPORT_SOURCE";
/// Environment variable holding the destination directory.
pub const DEST_ENV: &str = "ASSET_IMPORT_DEST";

/// Runs an external copy program.
///
/// Arguments may contain `{source}` and `{dest}` placeholders, which are
/// replaced with the source path and destination directory. The same paths
/// are also exported as [`SOURCE_ENV`] and [`DEST_ENV`], which is how
/// commands that go through a shell should read them: a substituted path is
/// never re-parsed as shell syntax that way.
#[derive(Debug, Clone)]
pub struct CommandHostCopy {
    argv: Vec<String>,
}

impl CommandHostCopy {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// The platform's stock recursive copy command.
    pub fn system_default() -> Self {
        Self::new(default_argv())
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn render(&self, source: &Path, dest_dir: &Path) -> Result<Vec<String>, CopyError> {
        if self.argv.is_empty() {
            return Err(CopyError::InvalidInput("host copy command is empty".into()));
        }
        let source = source.to_string_lossy();
        let dest = dest_dir.to_string_lossy();
        Ok(self
            .argv
            .iter()
            .map(|arg| arg.replace("{source}", &source).replace("{dest}", &dest))
            .collect())
    }
}

#[cfg(windows)]
fn default_argv() -> Vec<String> {
    powershell_argv()
}

#[cfg_attr(not(windows), allow(dead_code))]
fn powershell_argv() -> Vec<String> {
    vec![
        "powershell".into(),
        "-NoProfile".into(),
        "-NonInteractive".into(),
        "-Command".into(),
        format!("Copy-Item -LiteralPath $env:{SOURCE_ENV} -Destination $env:{DEST_ENV} -Recurse -Force"),
    ]
}

#[cfg(not(windows))]
fn default_argv() -> Vec<String> {
    vec![
        "cp".into(),
        "-R".into(),
        "-f".into(),
        "{source}".into(),
        "{dest}".into(),
    ]
}

/// Map a host copy's exit status onto an outcome.
///
/// Interrupt/terminate/hangup signals, exit code 130 and Windows'
/// `ERROR_CANCELLED` (1223) mean the user dismissed the copy.
pub fn classify_exit(status: ExitStatus) -> Result<HostCopyOutcome, CopyError> {
    if status.success() {
        return Ok(HostCopyOutcome::Completed);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGHUP, SIGINT, SIGTERM
        if matches!(status.signal(), Some(1 | 2 | 15)) {
            return Ok(HostCopyOutcome::Dismissed);
        }
    }

    match status.code() {
        Some(130) | Some(1223) => Ok(HostCopyOutcome::Dismissed),
        _ => Err(CopyError::Io(format!("host copy exited with {status}"))),
    }
}

#[async_trait::async_trait]
impl HostCopy for CommandHostCopy {
    async fn run(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<HostCopyOutcome, CopyError> {
        let argv = self.render(source, dest_dir)?;
        let mut child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .env(SOURCE_ENV, source)
            .env(DEST_ENV, dest_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CopyError::io(format!("spawning {}", argv[0]), e))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| CopyError::io("waiting for host copy", e))?;
                classify_exit(status)
            }
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill host copy");
                }
                Err(CopyError::Cancelled)
            }
        }
    }
}

/// Copier that hands the transfer to the host's native copy affordance and
/// infers progress by sampling the destination size.
pub struct InteractiveCopier {
    host: Arc<dyn HostCopy>,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl InteractiveCopier {
    pub fn new(host: Arc<dyn HostCopy>) -> Self {
        Self {
            host,
            poll_interval: PROGRESS_INTERVAL,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, settle_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.settle_delay = settle_delay;
        self
    }

    /// Sample `target` until it reaches `total` bytes (and stays there across
    /// one settle delay) or until `stop` fires.
    async fn poll(
        &self,
        target: &Path,
        total: u64,
        started: Instant,
        progress: Option<&ProgressReporter>,
        stop: &CancellationToken,
    ) {
        let Some(progress) = progress else {
            return;
        };
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let current = tree_size_async(target).await;
            progress.report(CopyProgress::measure(
                current.min(total),
                total,
                started.elapsed(),
            ));

            if current >= total {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(self.settle_delay) => {}
                }
                if tree_size_async(target).await >= total {
                    tracing::debug!(target = %target.display(), total, "destination reached source size");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for InteractiveCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveCopier")
            .field("poll_interval", &self.poll_interval)
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Copier for InteractiveCopier {
    fn name(&self) -> &str {
        "interactive"
    }

    async fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError> {
        let (_, target) = prepare(source, dest_dir).await?;
        let total = tree_size_async(source).await;
        let started = Instant::now();
        tracing::debug!(source = %source.display(), target = %target.display(), total, "interactive copy");

        let stop = cancel.child_token();
        let transfer = async {
            let outcome = self.host.run(source, dest_dir, cancel).await;
            stop.cancel();
            outcome
        };
        let (outcome, ()) = tokio::join!(
            transfer,
            self.poll(&target, total, started, progress, &stop)
        );

        let result = match outcome {
            Ok(HostCopyOutcome::Completed) => {
                if tokio::fs::metadata(&target).await.is_ok() {
                    Ok(tree_size_async(&target).await)
                } else {
                    Err(CopyError::Io(format!(
                        "host copy finished but {} is missing",
                        target.display()
                    )))
                }
            }
            Ok(HostCopyOutcome::Dismissed) => Err(CopyError::Cancelled),
            Err(e) => Err(e),
        };

        match result {
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
