mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ccdredux", about = "CCD calibration and aperture photometry")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate every light group and measure its sources
    Reduce(commands::reduce::ReduceArgs),
    /// Show the calibration index built from a manifest
    Index(commands::index::IndexArgs),
    /// Generate a skeleton manifest from a directory of images
    Manifest(commands::manifest::ManifestArgs),
    /// Print, save, or check a reduction config
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Reduce(args) => commands::reduce::run(args),
        Commands::Index(args) => commands::index::run(args),
        Commands::Manifest(args) => commands::manifest::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
