//! ppescan - run the PPE detection pipeline on one image.
//!
//! Loads the configured models, validates and decodes the image, runs every
//! model against it, prints per-model summaries and detection tables, and
//! writes CSV plus annotated-image exports. Per-model failures degrade that
//! model's entry; export failures are warnings and never discard the
//! computed reports.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::ImageFormat;

use ppescan::{
    annotate, load_adapters, to_csv, to_image_bytes, to_table, BoundingBox, Detection,
    DetectorAdapter, ExecutionMode, ModelOutcome, ModelRegistry, Pipeline, PipelineConfig,
    PipelineRun, StubBackend,
};

#[derive(Parser, Debug)]
#[command(name = "ppescan", version, about = "PPE detection on a single image")]
struct Args {
    /// Image to analyze (JPEG or PNG).
    image: PathBuf,

    /// TOML configuration file. Falls back to PPESCAN_CONFIG, then defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Confidence threshold override, 0.10..=1.00.
    #[arg(long)]
    threshold: Option<f32>,

    /// Directory for exported artifacts.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Run models in parallel threads instead of sequentially.
    #[arg(long)]
    parallel: bool,

    /// Per-model timeout in milliseconds (parallel mode only).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Use a scripted stub model instead of configured weights (smoke runs).
    #[arg(long)]
    stub: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load()?,
    };

    let registry = if args.stub {
        stub_registry()?
    } else {
        let (registry, failures) = load_adapters(&config.models);
        for failure in &failures {
            log::warn!("{failure}");
        }
        registry
    };

    let mode = if args.parallel {
        ExecutionMode::Parallel {
            timeout: args.timeout_ms.map(Duration::from_millis),
        }
    } else {
        ExecutionMode::Sequential
    };
    let pipeline = Pipeline::new(&config, registry)?.with_execution_mode(mode);
    log::info!("models: {}", pipeline.model_names().join(", "));

    let upload = fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;
    let run = match args.threshold {
        Some(threshold) => pipeline.run_with_threshold(&upload, threshold)?,
        None => pipeline.run(&upload)?,
    };

    for outcome in run.comparison.outcomes() {
        match outcome {
            ModelOutcome::Completed(report) => {
                log::info!(
                    "{}: {} detections in {:.3}s (~{:.2} fps) at threshold {}",
                    report.model_name,
                    report.total(),
                    report.inference_duration.as_secs_f64(),
                    report.throughput_fps(),
                    report.threshold
                );
                for (category, count) in &report.category_counts {
                    log::info!("{}: {} x {}", report.model_name, count, category);
                }
                print_table(report);
            }
            ModelOutcome::Failed { model_name, error } => {
                log::warn!("{model_name}: run failed: {error}");
            }
        }
    }

    if run.comparison.success_count() == 0 {
        return Err(anyhow!("all models failed"));
    }

    write_exports(&run, &args.out_dir);
    Ok(())
}

fn print_table(report: &ppescan::DetectionReport) {
    let rows = to_table(report);
    if rows.is_empty() {
        println!("[{}] no objects detected", report.model_name);
        return;
    }
    println!("[{}]", report.model_name);
    println!("{:<10} {:<24} {:>10}  {}", "Category", "Class", "Confidence", "Level");
    for row in rows {
        println!(
            "{:<10} {:<24} {:>10.3}  {}",
            row.category, row.class, row.confidence, row.level
        );
    }
}

/// Exports are best-effort: a failed artifact is logged and skipped, the
/// on-screen results above remain valid.
fn write_exports(run: &PipelineRun, out_dir: &Path) {
    if let Err(e) = fs::create_dir_all(out_dir) {
        log::warn!("cannot create export directory {}: {e}", out_dir.display());
        return;
    }

    for report in run.comparison.reports() {
        let stem = file_stem(&report.model_name);

        let csv_path = out_dir.join(format!("{stem}.csv"));
        if let Err(e) = fs::write(&csv_path, to_csv(report)) {
            log::warn!("csv export failed for {}: {e}", report.model_name);
        } else {
            log::info!("wrote {}", csv_path.display());
        }

        let annotated = annotate(&run.image, &report.detections);
        let image_path = out_dir.join(format!("{stem}.jpg"));
        match to_image_bytes(&annotated, ImageFormat::Jpeg) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&image_path, bytes) {
                    log::warn!("image export failed for {}: {e}", report.model_name);
                } else {
                    log::info!("wrote {}", image_path.display());
                }
            }
            Err(e) => log::warn!("image export failed for {}: {e}", report.model_name),
        }
    }
}

fn file_stem(model_name: &str) -> String {
    model_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn stub_registry() -> Result<ModelRegistry> {
    let script = vec![
        Detection::new("helmet", 0.91, BoundingBox::new(40.0, 20.0, 120.0, 90.0)),
        Detection::new("safety-vest", 0.64, BoundingBox::new(60.0, 95.0, 150.0, 210.0)),
        Detection::new("person", 0.42, BoundingBox::new(30.0, 10.0, 160.0, 230.0)),
    ];
    let mut registry = ModelRegistry::new();
    registry.register(DetectorAdapter::new("stub", StubBackend::new(script)))?;
    Ok(registry)
}
