use std::path::Path;

use ccdredux_core::frame::filter_label;
use ccdredux_core::pipeline::config::ReductionConfig;
use ccdredux_core::pipeline::ReductionOutput;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    warn: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            warn: Style::new().yellow().bold(),
        }
    }
}

fn on_off(s: &Styles, enabled: bool, label: &str) -> String {
    if enabled {
        s.method.apply_to(label).to_string()
    } else {
        s.disabled.apply_to("skipped").to_string()
    }
}

pub fn print_reduction_summary(config: &ReductionConfig, manifest: &Path, outdir: &Path) {
    let s = Styles::new();
    let cal = &config.calibration;
    let clip = &config.stacking.clip;
    let phot = &config.photometry;

    println!();
    println!("  {}", s.title.apply_to("CCD Reduction"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(13)));
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Manifest"),
        s.path.apply_to(manifest.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(outdir.display())
    );
    if !config.exclude_filters.is_empty() {
        let excluded: Vec<String> = config.exclude_filters.iter().map(char::to_string).collect();
        println!(
            "  {:<14}{}",
            s.label.apply_to("Excluded"),
            s.disabled.apply_to(excluded.join(", "))
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Calibration"));
    println!("    {:<12}{}", s.label.apply_to("Darks"), on_off(&s, !cal.skip_dark, "applied"));
    println!("    {:<12}{}", s.label.apply_to("Flats"), on_off(&s, !cal.skip_flat, "applied"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Clip"),
        s.value.apply_to(format!("{} sigma, {:?}", clip.sigma, clip.statistic))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Masks"),
        s.method.apply_to(cal.mask_combination)
    );
    if cal.force {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Force"),
            s.warn.apply_to("mismatched dark times allowed")
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Photometry"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Aperture"),
        s.value.apply_to(format!("R = {} px", phot.aperture_radius))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sub-frame"),
        s.value.apply_to(format!("{0} x {0} px", 2 * phot.half_width))
    );
    if phot.smoothing_sigma > 0.0 {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Smoothing"),
            s.value.apply_to(format!("sigma {}", phot.smoothing_sigma))
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Smoothing"),
            s.disabled.apply_to("disabled")
        );
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sources"),
        s.value.apply_to(format!("brightest {}", config.detection.brightest))
    );
    println!();
}

pub fn print_results(output: &ReductionOutput<'_>) {
    let s = Styles::new();

    println!();
    for group in &output.groups {
        let c = &group.calibrated;
        let title = format!(
            "Filter {}  gain {}  {}s  ({} frames)",
            filter_label(c.key.filter),
            c.key.gain,
            c.key.int_time,
            c.light_frames
        );
        println!("  {}", s.header.apply_to(title));
        if c.degraded {
            println!("    {}", s.warn.apply_to("degraded: dark integration time mismatch"));
        }
        println!(
            "    {:<12}{}",
            s.label.apply_to("Bad pixels"),
            s.value.apply_to(c.masks.combined)
        );
        for m in &group.sources.measured {
            println!(
                "    {:>3}  ({:>7.1}, {:>7.1})  mag {:>7.3}  sigma {:>5.2}  R2 {:.3}",
                m.id,
                m.centroid.0,
                m.centroid.1,
                m.aperture.instrumental_magnitude,
                m.fit.sigma,
                m.r_squared
            );
        }
        for skipped in &group.sources.skipped {
            println!(
                "    {:>3}  {}",
                skipped.id,
                s.disabled.apply_to(format!("skipped: {}", skipped.reason))
            );
        }
        println!();
    }

    for failure in &output.failures {
        println!("  {} {}", s.warn.apply_to("Failed"), failure);
    }
}
