use anyhow::Result;
use asset_import::AssetManager;
use asset_import::progress::human_bytes;

/// Print cache size and item count.
pub async fn stats(manager: &AssetManager) -> Result<()> {
    let stats = manager.cache_stats().await;
    println!("Cache root: {}", manager.registry().root().display());
    println!("Items:      {}", stats.item_count);
    println!("Size:       {}", human_bytes(stats.total_bytes));
    Ok(())
}

/// Print every registry entry as `<key>  <path>`.
pub fn list(manager: &AssetManager) -> Result<()> {
    let entries = manager.registry().entries();
    if entries.is_empty() {
        println!("The asset cache is empty.");
        return Ok(());
    }

    for (key, path) in &entries {
        let short = key.as_str().get(..12).unwrap_or(key.as_str());
        println!("{short}  {}", path.display());
    }
    println!("\n{} item(s)", entries.len());
    Ok(())
}

pub async fn clear(manager: &AssetManager) -> Result<()> {
    let before = manager.cache_stats().await;
    manager
        .clear_cache()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!(
        "Cleared {} item(s), {} freed.",
        before.item_count,
        human_bytes(before.total_bytes)
    );
    Ok(())
}
