use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Import behaviour supplied by the host application's settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Keep imported assets in the cache for reuse.
    pub cache_enabled: bool,
    /// Ask before copying single files larger than this. `0` never asks.
    pub large_file_warning_mb: u64,
    /// Extra attempts after the first failed copy.
    pub retry_attempts: u32,
    /// Base back-off; retry `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    /// Compare size (and, under `digest_ceiling_mb`, content) after copying a file.
    pub verify_on_import: bool,
    pub digest_ceiling_mb: u64,
    /// Parent of `AssetCache/` and `Assets/`. Defaults to the OS temp directory.
    pub temp_root: Option<PathBuf>,
    /// Argv for the interactive copier's host command, with `{source}` and
    /// `{dest}` placeholders. Defaults to the platform copy command.
    pub host_copy_command: Option<Vec<String>>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            large_file_warning_mb: 4096,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            verify_on_import: true,
            digest_ceiling_mb: 100,
            temp_root: None,
            host_copy_command: None,
        }
    }
}

impl ImportSettings {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// `<temp-root>/AssetCache`
    pub fn cache_root(&self) -> PathBuf {
        self.temp_root().join("AssetCache")
    }

    /// `<temp-root>/Assets`
    pub fn scratch_root(&self) -> PathBuf {
        self.temp_root().join("Assets")
    }

    pub fn large_file_threshold_bytes(&self) -> Option<u64> {
        (self.large_file_warning_mb > 0).then(|| self.large_file_warning_mb.saturating_mul(MIB))
    }

    pub fn digest_ceiling_bytes(&self) -> u64 {
        self.digest_ceiling_mb.saturating_mul(MIB)
    }

    /// Delay before the given retry (1-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(retry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ImportSettings::default();
        assert!(s.cache_enabled);
        assert!(s.verify_on_import);
        assert_eq!(s.retry_attempts, 3);
        assert_eq!(s.large_file_threshold_bytes(), Some(4096 * MIB));
        assert_eq!(s.digest_ceiling_bytes(), 100 * MIB);
    }

    #[test]
    fn layout_hangs_off_temp_root() {
        let s = ImportSettings {
            temp_root: Some(PathBuf::from("/scratch")),
            ..Default::default()
        };
        assert_eq!(s.cache_root(), PathBuf::from("/scratch/AssetCache"));
        assert_eq!(s.scratch_root(), PathBuf::from("/scratch/Assets"));
    }

    #[test]
    fn zero_threshold_disables_prompt() {
        let s = ImportSettings {
            large_file_warning_mb: 0,
            ..Default::default()
        };
        assert_eq!(s.large_file_threshold_bytes(), None);
    }

    #[test]
    fn huge_megabyte_values_saturate() {
        let s = ImportSettings {
            large_file_warning_mb: u64::MAX,
            digest_ceiling_mb: u64::MAX / 2,
            ..Default::default()
        };
        assert_eq!(s.large_file_threshold_bytes(), Some(u64::MAX));
        assert_eq!(s.digest_ceiling_bytes(), u64::MAX);
    }

    #[test]
    fn retry_delay_grows_with_attempt() {
        let s = ImportSettings {
            retry_delay_ms: 200,
            ..Default::default()
        };
        assert_eq!(s.retry_delay(1), Duration::from_millis(200));
        assert_eq!(s.retry_delay(3), Duration::from_millis(600));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let s: ImportSettings = toml::from_str(
            r#"
cache_enabled = false
retry_attempts = 5
host_copy_command = ["rsync", "-a", "{source}", "{dest}"]
"#,
        )
        .unwrap();
        assert!(!s.cache_enabled);
        assert_eq!(s.retry_attempts, 5);
        assert!(s.verify_on_import);
        assert_eq!(s.large_file_warning_mb, 4096);
        assert_eq!(s.host_copy_command.unwrap()[0], "rsync");
    }
}
