//! Score saved detector predictions with the LOFAR metric.
//!
//! Usage:
//! ```
//! cargo run --release --bin lofar_score -- --catalog comps.csv \
//!     --predictions preds.json --fits-dir cutouts/ --output-dir out/
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lofar_score::evaluator::{load_ground_truth_boxes, load_predictions};
use lofar_score::misboxed::ManifestWriter;
use lofar_score::{LofarEvaluator, ScoreConfig};

/// Command line arguments; flags override values from `--config`
#[derive(Parser, Debug)]
#[command(
    name = "lofar_score",
    about = "Evaluate radio source detections against a component catalog",
    long_about = None
)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Component catalog CSV (Source_Name, Component_Name, RA, DEC)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// JSON array of prediction records
    #[arg(long)]
    predictions: PathBuf,

    /// Directory with `{source}_radio_DR2.fits` cutouts
    #[arg(long)]
    fits_dir: Option<PathBuf>,

    /// Directory for cache artifacts, saved predictions and misboxed manifests
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Dataset name used in cache keys
    #[arg(long)]
    dataset_name: Option<String>,

    /// Neighbour search radius in arcseconds
    #[arg(long)]
    radius: Option<f64>,

    /// Prediction pixels per FITS pixel
    #[arg(long)]
    scale_factor: Option<f64>,

    /// Prediction image side length in pixels
    #[arg(long)]
    imsize: Option<f64>,

    /// Recompute cached ground truth
    #[arg(long)]
    overwrite: bool,

    /// Cache artifact suffix
    #[arg(long)]
    save_appendix: Option<String>,

    /// Write a manifest of failing images per category (needs --output-dir)
    #[arg(long)]
    collect_misboxed: bool,

    /// Print histograms, recovered fractions and IoU statistics
    #[arg(long)]
    detailed: bool,

    /// JSON array of ground-truth boxes per image for IoU statistics
    #[arg(long)]
    ground_truth_boxes: Option<PathBuf>,

    /// Project sources in parallel
    #[arg(long)]
    parallel: bool,
}

impl Args {
    fn into_config(self) -> Result<(ScoreConfig, Self)> {
        let mut config = match &self.config {
            Some(path) => ScoreConfig::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ScoreConfig::default(),
        };

        if let Some(catalog) = &self.catalog {
            config.component_catalog_path = catalog.clone();
        }
        if let Some(fits_dir) = &self.fits_dir {
            config.fits_dir = fits_dir.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = Some(output_dir.clone());
        }
        if let Some(name) = &self.dataset_name {
            config.dataset_name = name.clone();
        }
        if let Some(radius) = self.radius {
            config.search_radius_arcsec = radius;
        }
        if let Some(scale_factor) = self.scale_factor {
            config.scale_factor = scale_factor;
        }
        if let Some(imsize) = self.imsize {
            config.imsize = imsize;
        }
        if let Some(appendix) = &self.save_appendix {
            config.save_appendix = appendix.clone();
        }
        config.overwrite |= self.overwrite;
        config.parallel |= self.parallel;

        Ok((config, self))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let (config, args) = Args::parse().into_config()?;
    log::info!(
        "Scoring {} against {} (radius {}\", scale {}, imsize {})",
        args.predictions.display(),
        config.component_catalog_path.display(),
        config.search_radius_arcsec,
        config.scale_factor,
        config.imsize
    );

    let predictions = load_predictions(&args.predictions)
        .with_context(|| format!("loading predictions {}", args.predictions.display()))?;

    let mut evaluator = LofarEvaluator::new(config.clone())
        .context("invalid configuration")?
        .detailed(args.detailed);

    if let Some(path) = &args.ground_truth_boxes {
        let boxes = load_ground_truth_boxes(path)
            .with_context(|| format!("loading ground-truth boxes {}", path.display()))?;
        evaluator = evaluator.with_ground_truth_boxes(boxes)?;
    }

    if args.collect_misboxed {
        let output_dir = config
            .output_dir
            .clone()
            .context("--collect-misboxed requires --output-dir")?;
        evaluator = evaluator.with_misboxed_sink(Box::new(ManifestWriter::new(output_dir)));
    }

    evaluator.reset();
    evaluator.process(predictions);
    match evaluator.evaluate().context("evaluation failed")? {
        Some(output) => println!("{}", serde_json::to_string_pretty(&output)?),
        None => println!("{{}}"),
    }
    Ok(())
}
