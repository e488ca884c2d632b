use std::path::PathBuf;

use anyhow::{Context, Result};
use ccdredux_core::io::scan_directory;
use clap::Args;

#[derive(Args)]
pub struct ManifestArgs {
    /// Directory to scan recursively for .tif/.tiff/.png frames
    pub dir: PathBuf,

    /// Write the manifest to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: &ManifestArgs) -> Result<()> {
    let manifest = scan_directory(&args.dir)
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;
    let toml_str = manifest.to_toml()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
        println!(
            "Manifest with {} frame(s) saved to {}",
            manifest.frames.len(),
            path.display()
        );
        println!("Fill in gain, exposure and filter for every entry before reducing.");
    } else {
        print!("{}", toml_str);
    }
    Ok(())
}
