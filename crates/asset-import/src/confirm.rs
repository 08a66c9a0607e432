use std::path::Path;

/// Blocking yes/no prompt shown before copying an unusually large file.
///
/// Called synchronously from inside an import, so implementations should
/// return as soon as the user answers.
pub trait ConfirmPrompt: Send + Sync {
    fn confirm_large_file(&self, source: &Path, size_bytes: u64) -> bool;
}

/// Always answers the same way. Useful for unattended hosts.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl ConfirmPrompt for AutoConfirm {
    fn confirm_large_file(&self, _source: &Path, _size_bytes: u64) -> bool {
        self.0
    }
}
