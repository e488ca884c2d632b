use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ccdredux_core::frame::filter_label;
use ccdredux_core::io::{save_mask_png, save_tiff, Manifest};
use ccdredux_core::pipeline::config::ReductionConfig;
use ccdredux_core::pipeline::{
    run_reduction_reported, GroupReduction, ProgressReporter, ReductionOutput, ReductionStage,
};
use clap::Args;
use tracing::info;

use super::{load_config, manifest_dir};
use crate::progress::BarReporter;
use crate::summary::{print_reduction_summary, print_results};

#[derive(Args)]
pub struct ReduceArgs {
    /// Frame manifest (TOML)
    pub manifest: PathBuf,

    /// Reduction config file (TOML); flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Sigma-clip width k
    #[arg(long)]
    pub sigma: Option<f64>,

    /// Aperture radius in pixels
    #[arg(long)]
    pub radius: Option<usize>,

    /// Sub-frame half-width in pixels
    #[arg(long)]
    pub length: Option<usize>,

    /// Gaussian pre-smoothing sigma (0 disables)
    #[arg(long)]
    pub smoothing: Option<f32>,

    /// Proceed with the nearest dark when integration times differ
    #[arg(long)]
    pub force: bool,

    /// Skip dark subtraction (requires --no-flat)
    #[arg(long)]
    pub no_dark: bool,

    /// Skip flat-field correction
    #[arg(long)]
    pub no_flat: bool,

    /// Filters to leave out, e.g. --exclude-filter B,R
    #[arg(long, value_delimiter = ',')]
    pub exclude_filter: Vec<char>,

    /// Number of brightest sources to measure per master light
    #[arg(long)]
    pub brightest: Option<usize>,

    /// Output directory
    #[arg(short, long, default_value = "redux")]
    pub outdir: PathBuf,
}

pub fn run(args: &ReduceArgs) -> Result<()> {
    let config = build_config(args)?;
    config.validate()?;
    print_reduction_summary(&config, &args.manifest, &args.outdir);

    let manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("Failed to read manifest {}", args.manifest.display()))?;
    let ingested = manifest
        .ingest(&manifest_dir(&args.manifest), &config)
        .context("Failed to build calibration index")?;
    println!(
        "Ingested {} frame(s) into {} group(s)",
        ingested.index.frame_count(),
        ingested.index.len()
    );

    let reporter = Arc::new(BarReporter::new());
    let output = run_reduction_reported(&ingested.index, &config, reporter.clone())?;
    print_results(&output);

    if output.groups.is_empty() {
        bail!("No light group could be reduced");
    }
    write_outputs(&output, &args.outdir, reporter.as_ref())?;
    println!("\nOutput saved to {}", args.outdir.display());
    Ok(())
}

fn build_config(args: &ReduceArgs) -> Result<ReductionConfig> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(sigma) = args.sigma {
        config.stacking.clip.sigma = sigma;
    }
    if let Some(radius) = args.radius {
        config.photometry.aperture_radius = radius;
    }
    if let Some(length) = args.length {
        config.photometry.half_width = length;
    }
    if let Some(smoothing) = args.smoothing {
        config.photometry.smoothing_sigma = smoothing;
    }
    if let Some(brightest) = args.brightest {
        config.detection.brightest = brightest;
    }
    config.calibration.force |= args.force;
    config.calibration.skip_dark |= args.no_dark;
    config.calibration.skip_flat |= args.no_flat;
    config
        .exclude_filters
        .extend(args.exclude_filter.iter().map(|c| c.to_ascii_uppercase()));
    Ok(config)
}

fn file_stem(group: &GroupReduction<'_>) -> String {
    let key = group.calibrated.key;
    format!(
        "{}_{}_{}s",
        filter_label(key.filter),
        key.gain,
        key.int_time.to_string().replace('.', "-")
    )
}

fn write_outputs(
    output: &ReductionOutput<'_>,
    outdir: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    std::fs::create_dir_all(outdir)
        .with_context(|| format!("Failed to create {}", outdir.display()))?;

    reporter.begin_stage(ReductionStage::Writing, Some(output.groups.len()));
    for (i, group) in output.groups.iter().enumerate() {
        let stem = file_stem(group);
        let master = group.calibrated.master;
        let light_path = outdir.join(format!("master_{stem}.tiff"));
        save_tiff(master.data(), &light_path)
            .with_context(|| format!("Failed to write {}", light_path.display()))?;
        info!(path = %light_path.display(), "Wrote master light");
        if let Some(mask) = master.bad_map() {
            let mask_path = outdir.join(format!("badmap_{stem}.png"));
            save_mask_png(mask, &mask_path)
                .with_context(|| format!("Failed to write {}", mask_path.display()))?;
        }
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let report_path = outdir.join("report.toml");
    let report = toml::to_string_pretty(&output.report())?;
    std::fs::write(&report_path, report)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    Ok(())
}
