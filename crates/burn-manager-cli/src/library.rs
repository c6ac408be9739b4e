use anyhow::Context;
use burn_manager_core::Dataset;
use std::fs;
use std::path::Path;
use tracing::info;

/// Loads and reconciles the snapshot at `path`, or starts an empty library if
/// none exists yet.
pub fn load(path: &Path) -> anyhow::Result<Dataset> {
    if !path.exists() {
        info!("No library at {}, starting empty", path.display());
        return Ok(Dataset::new());
    }
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading library {}", path.display()))?;
    let dataset =
        Dataset::load_json(&json).with_context(|| format!("loading library {}", path.display()))?;
    info!(
        "Loaded {} files and {} volumes from {}",
        dataset.files().len(),
        dataset.volumes().len(),
        path.display()
    );
    Ok(dataset)
}

/// Writes the snapshot through a temporary file so a failed write leaves the
/// previous library intact.
pub fn save(dataset: &Dataset, path: &Path) -> anyhow::Result<()> {
    let json = dataset.to_json()?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    info!("Saved library to {}", path.display());
    Ok(())
}
