use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::confirm::ConfirmPrompt;
use crate::copier::{Copier, SimpleCopier};
use crate::error::CopyError;
use crate::progress::ProgressReporter;

/// What a [`ScriptedCopier`] writes once it stops failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Output {
    #[default]
    Faithful,
    /// All but the last byte.
    Truncated,
    /// Same length, first byte flipped.
    Corrupted,
}

/// A copier that fails a fixed number of times before delegating to
/// [`SimpleCopier`], optionally producing a damaged file instead.
#[derive(Debug, Default)]
pub struct ScriptedCopier {
    remaining_failures: AtomicU32,
    calls: AtomicU32,
    output: Output,
    inner: SimpleCopier,
}

impl ScriptedCopier {
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Fail the first `times` calls with an I/O error.
    pub fn failing_times(times: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(times),
            ..Self::default()
        }
    }

    /// "Succeed" by writing all but the last byte of a single-file source.
    pub fn truncating() -> Self {
        Self {
            output: Output::Truncated,
            ..Self::default()
        }
    }

    /// "Succeed" by writing a same-length copy with its first byte flipped.
    pub fn corrupting() -> Self {
        Self {
            output: Output::Corrupted,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Copier for ScriptedCopier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            // Leave debris behind for the caller to clean up.
            std::fs::create_dir_all(dest_dir).map_err(|e| CopyError::io("debris", e))?;
            std::fs::write(dest_dir.join("debris.part"), b"partial")
                .map_err(|e| CopyError::io("debris", e))?;
            return Err(CopyError::Io("injected failure".into()));
        }

        let mut data = match self.output {
            Output::Faithful => return self.inner.copy(source, dest_dir, progress, cancel).await,
            Output::Truncated | Output::Corrupted => {
                std::fs::read(source).map_err(|e| CopyError::io("read", e))?
            }
        };
        if self.output == Output::Truncated {
            data.pop();
        } else if let Some(first) = data.first_mut() {
            *first ^= 0xff;
        }

        std::fs::create_dir_all(dest_dir).map_err(|e| CopyError::io("mkdir", e))?;
        let name = source.file_name().unwrap_or_default();
        std::fs::write(dest_dir.join(name), &data).map_err(|e| CopyError::io("write", e))?;
        Ok(data.len() as u64)
    }
}

/// A copier that blocks until [`GatedCopier::release`] is called (or the
/// copy is cancelled), then copies with [`SimpleCopier`].
#[derive(Debug)]
pub struct GatedCopier {
    gate: Semaphore,
    entered: Notify,
    calls: AtomicU32,
    inner: SimpleCopier,
}

impl GatedCopier {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: Notify::new(),
            calls: AtomicU32::new(0),
            inner: SimpleCopier::new(),
        }
    }

    /// Let one blocked copy proceed.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Wait until a copy has started and is blocked on the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for GatedCopier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Copier for GatedCopier {
    fn name(&self) -> &str {
        "gated"
    }

    async fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64, CopyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        tokio::select! {
            _ = cancel.cancelled() => return Err(CopyError::Cancelled),
            permit = self.gate.acquire() => {
                permit.map_err(|e| CopyError::Io(e.to_string()))?.forget();
            }
        }
        self.inner.copy(source, dest_dir, progress, cancel).await
    }
}

/// A prompt with a fixed answer that counts how often it was asked.
#[derive(Debug, Default)]
pub struct FixedPrompt {
    answer: bool,
    asked: AtomicU32,
}

impl FixedPrompt {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicU32::new(0),
        }
    }

    pub fn asked(&self) -> u32 {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ConfirmPrompt for FixedPrompt {
    fn confirm_large_file(&self, _source: &Path, _size_bytes: u64) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_copier_fails_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"abc").unwrap();
        let copier = ScriptedCopier::failing_times(2);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let result = copier.copy(&src, &dir.path().join("out"), None, &cancel).await;
            assert!(matches!(result, Err(CopyError::Io(_))));
        }
        let bytes = copier
            .copy(&src, &dir.path().join("out"), None, &cancel)
            .await
            .unwrap();
        assert_eq!(bytes, 3);
        assert_eq!(copier.calls(), 3);
    }

    #[tokio::test]
    async fn corrupting_copier_keeps_length_but_changes_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"abcd").unwrap();
        let out = dir.path().join("out");

        let bytes = ScriptedCopier::corrupting()
            .copy(&src, &out, None, &CancellationToken::new())
            .await
            .unwrap();

        let copy = std::fs::read(out.join("a.bin")).unwrap();
        assert_eq!(bytes, 4);
        assert_eq!(copy.len(), 4);
        assert_ne!(copy, b"abcd");
        assert_eq!(&copy[1..], b"bcd");
    }

    #[tokio::test]
    async fn gated_copier_respects_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"abc").unwrap();
        let copier = GatedCopier::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = copier.copy(&src, &dir.path().join("out"), None, &cancel).await;
        assert_eq!(result, Err(CopyError::Cancelled));
    }
}
