pub mod config;
pub mod index;
pub mod manifest;
pub mod reduce;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ccdredux_core::pipeline::config::ReductionConfig;

/// Read a TOML reduction config, or fall back to the defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<ReductionConfig> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&contents).context("Invalid reduction config")
        }
        None => Ok(ReductionConfig::default()),
    }
}

/// Directory relative manifest paths resolve against.
pub fn manifest_dir(manifest: &Path) -> PathBuf {
    manifest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
