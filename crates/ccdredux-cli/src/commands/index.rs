use std::path::PathBuf;

use anyhow::{Context, Result};
use ccdredux_core::io::Manifest;
use clap::Args;

use super::{load_config, manifest_dir};

#[derive(Args)]
pub struct IndexArgs {
    /// Frame manifest (TOML)
    pub manifest: PathBuf,

    /// Reduction config file (TOML); its filter exclusions apply
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &IndexArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("Failed to read manifest {}", args.manifest.display()))?;
    let ingested = manifest.ingest(&manifest_dir(&args.manifest), &config)?;

    println!(
        "{} frame(s) in {} group(s), {} skipped by configuration",
        ingested.index.frame_count(),
        ingested.index.len(),
        ingested.skipped
    );
    for line in ingested.index.describe() {
        println!("  {line}");
    }
    Ok(())
}
