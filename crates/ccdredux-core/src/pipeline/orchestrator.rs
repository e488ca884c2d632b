use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::calibration::{CalibratedLight, CalibrationChain, CalibrationIndex};
use crate::consts::PARALLEL_GROUP_THRESHOLD;
use crate::detection::detect_sources;
use crate::error::Result;
use crate::filters::gaussian_blur::gaussian_blur_array;
use crate::frame::FrameKind;
use crate::group::FrameGroup;
use crate::photometry::{measure_sources, SourceTable};
use crate::stats::ValidWindow;

use super::config::ReductionConfig;
use super::types::{GroupReduction, NoOpReporter, ProgressReporter, ReductionOutput, ReductionStage};

/// Calibrate every light group in `index`, then detect and measure sources
/// on each master light.
///
/// Fails as a whole only on invalid configuration or when a required frame
/// type is absent from the index altogether. Any other failure is confined
/// to its group (recorded in [`ReductionOutput::failures`]) or source.
pub fn run_reduction_reported<'a>(
    index: &'a CalibrationIndex,
    config: &'a ReductionConfig,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<ReductionOutput<'a>> {
    config.validate()?;
    let chain = CalibrationChain::new(
        index,
        &config.calibration,
        &config.stacking.clip,
        config.stacking.saturation,
    );
    chain.check_preconditions()?;

    let lights: Vec<&FrameGroup> = index.groups_of(FrameKind::Light).collect();
    info!(
        light_groups = lights.len(),
        frames = index.frame_count(),
        "Starting reduction"
    );

    reporter.begin_stage(ReductionStage::Calibrating, Some(lights.len()));
    let done = AtomicUsize::new(0);
    let reduce_one = |group: &&'a FrameGroup| {
        let result = chain.reduce(*group);
        reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
        result
    };
    let results: Vec<_> = if lights.len() >= PARALLEL_GROUP_THRESHOLD {
        lights.par_iter().map(reduce_one).collect()
    } else {
        lights.iter().map(reduce_one).collect()
    };
    reporter.finish_stage();

    let mut output = ReductionOutput::default();
    let mut calibrated = Vec::new();
    for result in results {
        match result {
            Ok(light) => calibrated.push(light),
            Err(failure) => output.failures.push(failure),
        }
    }

    reporter.begin_stage(ReductionStage::Measuring, Some(calibrated.len()));
    for (i, light) in calibrated.into_iter().enumerate() {
        let sources = measure_group(&light, config);
        output.groups.push(GroupReduction {
            calibrated: light,
            sources,
        });
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    info!(
        reduced = output.groups.len(),
        failed = output.failures.len(),
        "Reduction complete"
    );
    Ok(output)
}

/// Smooth, detect and measure one master light.
fn measure_group(light: &CalibratedLight<'_>, config: &ReductionConfig) -> SourceTable {
    let master = light.master;
    let phot = &config.photometry;
    let smoothed = gaussian_blur_array(master.data(), phot.smoothing_sigma);

    let window = ValidWindow::unsaturated(config.stacking.saturation);
    let candidates = match detect_sources(
        &smoothed,
        master.bad_map(),
        window,
        &config.detection,
        phot.half_width,
    ) {
        Ok(c) => c,
        Err(e) => {
            warn!(group = %light.key, error = %e, "Source detection failed");
            return SourceTable::default();
        }
    };

    let table = measure_sources(master, &smoothed, &candidates, phot);
    info!(
        group = %light.key,
        candidates = candidates.len(),
        measured = table.measured.len(),
        skipped = table.skipped.len(),
        "Photometry complete"
    );
    table
}

/// Run a reduction without progress reporting.
pub fn run_reduction<'a>(
    index: &'a CalibrationIndex,
    config: &'a ReductionConfig,
) -> Result<ReductionOutput<'a>> {
    run_reduction_reported(index, config, Arc::new(NoOpReporter))
}
