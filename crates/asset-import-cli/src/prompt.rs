use std::io::{BufRead, Write};
use std::path::Path;

use asset_import::ConfirmPrompt;
use asset_import::progress::human_bytes;

/// Asks on the terminal before copying a large file.
pub struct TerminalPrompt;

impl ConfirmPrompt for TerminalPrompt {
    fn confirm_large_file(&self, source: &Path, size_bytes: u64) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "{} is {}. Copy it anyway? [y/N] ",
            source.display(),
            human_bytes(size_bytes)
        );
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        is_yes(&answer)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }
}
