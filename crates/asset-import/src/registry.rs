use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::copier::tree_size_async;
use crate::error::RegistryError;
use crate::key::SourceKey;

/// Name of the registry snapshot inside the cache root.
pub const REGISTRY_FILE: &str = "cache_registry.json";

/// Size and population of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Bytes on disk under the cache root.
    pub total_bytes: u64,
    /// Registered entries. Counted from memory, so it can disagree with the
    /// disk if cached directories are removed behind our back.
    pub item_count: usize,
}

/// Persisted map from [`SourceKey`] to a previously imported local path.
///
/// The in-memory map is authoritative while running; `cache_registry.json`
/// is the snapshot loaded at startup and rewritten after every change.
/// All mutation is serialized behind one async lock.
#[derive(Debug)]
pub struct AssetCacheRegistry {
    root: PathBuf,
    entries: RwLock<HashMap<SourceKey, PathBuf>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl AssetCacheRegistry {
    /// Open (creating if needed) the cache rooted at `root`.
    ///
    /// Entries whose target no longer exists are dropped. An unreadable
    /// registry file is treated as empty.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let entries = load_entries(&root.join(REGISTRY_FILE));
        Ok(Self {
            root,
            entries: RwLock::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn lookup(&self, key: &SourceKey) -> Option<PathBuf> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Record `key -> path`, replacing any previous entry, and persist.
    ///
    /// The in-memory map only changes once the snapshot is on disk, so a
    /// failed write leaves both untouched.
    pub async fn register(&self, key: SourceKey, path: PathBuf) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;

        let mut snapshot = snapshot_of(&self.entries.read().unwrap_or_else(|e| e.into_inner()));
        snapshot.insert(key.as_str().to_owned(), path.to_string_lossy().into_owned());
        self.persist(&snapshot).await?;

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, path);
        Ok(())
    }

    /// Delete every cached import and the registry itself.
    ///
    /// Deletion is best-effort: an entry that cannot be removed is logged and
    /// the rest are still attempted.
    pub async fn clear(&self) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;

        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut removed = 0usize;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name() == REGISTRY_FILE {
                continue;
            }
            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cached asset");
                }
            }
        }

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        match tokio::fs::remove_file(self.registry_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(root = %self.root.display(), removed, "asset cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let item_count = self.entries.read().unwrap_or_else(|e| e.into_inner()).len();
        CacheStats {
            total_bytes: tree_size_async(&self.root).await,
            item_count,
        }
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Vec<(SourceKey, PathBuf)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        list.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        list
    }

    /// Write the snapshot to a temp file and rename it over the registry.
    async fn persist(&self, snapshot: &BTreeMap<String, String>) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let path = self.registry_path();
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }
}

fn snapshot_of(entries: &HashMap<SourceKey, PathBuf>) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.as_str().to_owned(), v.to_string_lossy().into_owned()))
        .collect()
}

fn load_entries(path: &Path) -> HashMap<SourceKey, PathBuf> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read cache registry");
            return HashMap::new();
        }
    };

    let raw: HashMap<String, String> = match serde_json::from_slice(&contents) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt cache registry");
            return HashMap::new();
        }
    };

    let total = raw.len();
    let entries: HashMap<SourceKey, PathBuf> = raw
        .into_iter()
        .map(|(k, v)| (SourceKey::from_hex(k), PathBuf::from(v)))
        .filter(|(_, target)| target.exists())
        .collect();

    if entries.len() < total {
        tracing::warn!(
            dropped = total - entries.len(),
            "dropped cache entries whose targets are gone"
        );
    }
    entries
}
