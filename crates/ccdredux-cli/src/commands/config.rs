use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::load_config;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Validate an existing config and print it with defaults filled in
    #[arg(long, value_name = "FILE", conflicts_with = "output")]
    pub check: Option<PathBuf>,
}

/// Print or save the default reduction config, or check an existing one.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args.check.as_ref())?;
    if let Some(ref path) = args.check {
        config
            .validate()
            .with_context(|| format!("{} is not a usable reduction config", path.display()))?;
        eprintln!("{} is valid", path.display());
    }
    let toml_str = toml::to_string_pretty(&config)?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &toml_str)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            println!("Default config saved to {}", path.display());
        }
        None => print!("{toml_str}"),
    }

    Ok(())
}
