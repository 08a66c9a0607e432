use std::path::Path;

use anyhow::Result;
use asset_import::AssetManager;

/// Remove a temporary import. Cached imports are left alone.
pub async fn run(manager: &AssetManager, path: &Path) -> Result<()> {
    let removed = manager
        .cleanup(path)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if removed {
        println!("Removed {}.", path.display());
    } else {
        println!(
            "{} is part of the asset cache; use `asset-import cache clear` to remove it.",
            path.display()
        );
    }
    Ok(())
}
