//! Dataset evaluator wiring the scoring pipeline together.
//!
//! The lifecycle follows the usual inference loop: [`LofarEvaluator::reset`]
//! before a pass, [`LofarEvaluator::process`] for every batch of detector
//! output, then [`LofarEvaluator::evaluate`] once at the end. In a
//! distributed run only rank 0 produces a result.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, GroundTruth, ResultCache};
use crate::catalog::{
    check_unique_focus_names, focus_name_from_file_name, CatalogIndexer, ComponentCatalog,
};
use crate::classifier::{classify, DetailedReport, EvaluationResult, FailureCategory, ScoredImage};
use crate::comm::{Communicator, SingleProcess};
use crate::config::ScoreConfig;
use crate::containment::score_containment;
use crate::error::{Result, ScoreError};
use crate::geometry::{BoundingBox, ImageFrame, PixelLocation};
use crate::misboxed::{MisboxedRecord, MisboxedSink};
use crate::projector::CoordinateProjector;
use crate::selector::{select_central_box, ImagePrediction};

pub const PREDICTIONS_FILE_NAME: &str = "instances_predictions.json";

/// Annotated boxes of one image, used for IoU diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthBoxes {
    pub image_id: u64,
    pub boxes: Vec<[f64; 4]>,
}

/// Everything `evaluate` produces on the main process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutput {
    #[serde(rename = "bbox")]
    pub result: EvaluationResult,
    /// Images that entered the statistics
    pub evaluated: usize,
    /// Images excluded because their source could not be projected
    pub skipped: usize,
    pub failing_indices: BTreeMap<FailureCategory, Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DetailedReport>,
}

/// Accumulates predictions and scores them against the component catalog
pub struct LofarEvaluator {
    config: ScoreConfig,
    comm: Box<dyn Communicator>,
    sink: Option<Box<dyn MisboxedSink + Send>>,
    ground_truth_boxes: HashMap<u64, Vec<BoundingBox>>,
    detailed: bool,
    predictions: Vec<ImagePrediction>,
}

impl LofarEvaluator {
    pub fn new(config: ScoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            comm: Box::new(SingleProcess),
            sink: None,
            ground_truth_boxes: HashMap::new(),
            detailed: false,
            predictions: Vec::new(),
        })
    }

    pub fn with_communicator(mut self, comm: Box<dyn Communicator>) -> Self {
        self.comm = comm;
        self
    }

    /// Receive the failing images of every category after scoring
    pub fn with_misboxed_sink(mut self, sink: Box<dyn MisboxedSink + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Ground-truth annotation boxes, enabling IoU statistics in the detailed report
    pub fn with_ground_truth_boxes(mut self, boxes: Vec<GroundTruthBoxes>) -> Result<Self> {
        for entry in boxes {
            let parsed = entry
                .boxes
                .iter()
                .map(|coords| BoundingBox::from_array(*coords))
                .collect::<Result<Vec<_>>>()?;
            self.ground_truth_boxes.insert(entry.image_id, parsed);
        }
        Ok(self)
    }

    pub fn detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.predictions.clear();
    }

    /// Append detector output for a batch of images.
    pub fn process(&mut self, predictions: impl IntoIterator<Item = ImagePrediction>) {
        self.predictions.extend(predictions);
    }

    pub fn num_predictions(&self) -> usize {
        self.predictions.len()
    }

    /// Score all accumulated predictions.
    ///
    /// # Returns
    /// * `Ok(None)` on non-main ranks and when no predictions were received
    /// * `Ok(Some(output))` on the main process otherwise
    ///
    /// # Errors
    /// Duplicate focus names, unknown focus names and malformed predictions
    /// abort the evaluation.
    pub fn evaluate(&mut self) -> Result<Option<EvaluationOutput>> {
        let local = std::mem::take(&mut self.predictions);
        let predictions = if self.comm.world_size() > 1 {
            self.comm.synchronize();
            match self.comm.gather(local) {
                Some(all) => all,
                None => return Ok(None),
            }
        } else {
            local
        };

        if predictions.is_empty() {
            log::warn!("LOFAR evaluator did not receive valid predictions");
            return Ok(None);
        }
        for pred in &predictions {
            pred.validate()?;
        }

        if let Some(output_dir) = &self.config.output_dir {
            save_predictions(output_dir, &predictions)?;
        }

        let ground_truth = self.load_ground_truth(&predictions)?;
        let frame = self.config.image_frame();
        let images = score_locations(&predictions, &ground_truth, &frame, &self.ground_truth_boxes)?;

        let classification = classify(&images);
        let skipped = predictions.len() - images.len();
        log::info!(
            "Scored {} images ({} skipped): {:?}",
            images.len(),
            skipped,
            classification.result.to_map()
        );

        if let Some(sink) = self.sink.as_mut() {
            for category in FailureCategory::ALL {
                let records = misboxed_records(
                    &predictions,
                    &ground_truth,
                    &images,
                    &classification.failing_indices[&category],
                    &frame,
                );
                sink.collect(category, &records)?;
            }
        }

        let report = self.detailed.then(|| {
            let report = DetailedReport::build(&images, &classification);
            report.log_summary();
            report
        });

        Ok(Some(EvaluationOutput {
            result: classification.result,
            evaluated: images.len(),
            skipped,
            failing_indices: classification.failing_indices,
            report,
        }))
    }

    /// Run the indexer and projector, or reuse their cached output.
    fn load_ground_truth(&self, predictions: &[ImagePrediction]) -> Result<GroundTruth> {
        let focus_names: Vec<String> = predictions
            .iter()
            .map(|p| focus_name_from_file_name(&p.file_name))
            .collect();
        check_unique_focus_names(&focus_names)?;

        let config = &self.config;
        let key = CacheKey::new(
            &config.dataset_name,
            config.search_radius_arcsec,
            &config.component_catalog_path,
            &config.fits_dir,
            &focus_names,
        );
        let cache = ResultCache::new(
            config.output_dir.as_deref(),
            config.effective_appendix(),
            config.overwrite,
        );

        let (ground_truth, _status) = cache.get_or_compute(&key, || {
            let catalog = ComponentCatalog::load_csv(&config.component_catalog_path)?;
            let indexer = CatalogIndexer::build(
                &catalog,
                &focus_names,
                &config.fits_dir,
                config.search_radius_arcsec,
            )?;
            let projections = CoordinateProjector::new(config.parallel).project_all(&indexer);
            Ok(GroundTruth {
                indexer,
                projections,
            })
        })?;
        Ok(ground_truth)
    }
}

/// Select, count and package the outcome of every projectable image.
///
/// `predictions` and `ground_truth` must line up one to one. Images whose
/// source was skipped during projection are left out.
pub fn score_locations(
    predictions: &[ImagePrediction],
    ground_truth: &GroundTruth,
    frame: &ImageFrame,
    ground_truth_boxes: &HashMap<u64, Vec<BoundingBox>>,
) -> Result<Vec<ScoredImage>> {
    let entries = ground_truth.indexer.entries();
    if entries.len() != predictions.len() || ground_truth.projections.len() != predictions.len() {
        return Err(ScoreError::GroundTruthMismatch {
            ground_truth: entries.len(),
            predictions: predictions.len(),
        });
    }

    let mut images = Vec::with_capacity(predictions.len());
    for (index, ((pred, entry), projection)) in predictions
        .iter()
        .zip(entries)
        .zip(&ground_truth.projections)
        .enumerate()
    {
        let Some(locations) = projection.locations() else {
            continue;
        };

        let scored = pred.scored_boxes()?;
        let selected = select_central_box(&scored, locations.focus_loc, frame);
        let central_gt_box = ground_truth_boxes
            .get(&pred.image_id)
            .and_then(|boxes| central_box(boxes, locations.focus_loc, frame));

        images.push(ScoredImage {
            index,
            n_components: entry.n_components,
            selected,
            scores: score_containment(&selected.bbox, locations, frame),
            central_gt_box,
        });
    }
    Ok(images)
}

/// Smallest box covering the focus pixel; the first one wins on equal area.
fn central_box(
    boxes: &[BoundingBox],
    focus_loc: PixelLocation,
    frame: &ImageFrame,
) -> Option<BoundingBox> {
    boxes
        .iter()
        .filter(|b| frame.box_contains(b, focus_loc.x, focus_loc.y))
        .fold(None, |best: Option<&BoundingBox>, b| match best {
            Some(current) if current.area() <= b.area() => Some(current),
            _ => Some(b),
        })
        .copied()
}

fn misboxed_records(
    predictions: &[ImagePrediction],
    ground_truth: &GroundTruth,
    images: &[ScoredImage],
    failing: &[usize],
    frame: &ImageFrame,
) -> Vec<MisboxedRecord> {
    let by_index: HashMap<usize, &ScoredImage> = images.iter().map(|img| (img.index, img)).collect();

    failing
        .iter()
        .filter_map(|&index| {
            let image = by_index.get(&index)?;
            let pred = &predictions[index];
            let entry = &ground_truth.indexer.entries()[index];
            let locations = ground_truth.projections[index].locations()?;
            let (focus, components, close_components) =
                MisboxedRecord::image_space_locations(locations, frame);
            Some(MisboxedRecord {
                index,
                image_id: pred.image_id,
                file_name: pred.file_name.clone(),
                focus_name: entry.focus_name.clone(),
                selected_box: image.selected.bbox,
                score: image.selected.score,
                focus,
                components,
                close_components,
            })
        })
        .collect()
}

fn save_predictions(output_dir: &Path, predictions: &[ImagePrediction]) -> Result<()> {
    fs::create_dir_all(output_dir).map_err(|e| ScoreError::io(output_dir, e))?;
    let path = output_dir.join(PREDICTIONS_FILE_NAME);
    let json = serde_json::to_string(predictions)?;
    fs::write(&path, json).map_err(|e| ScoreError::io(&path, e))?;
    log::info!("Saved {} predictions to {}", predictions.len(), path.display());
    Ok(())
}

/// Read a JSON array of prediction records
pub fn load_predictions(path: &Path) -> Result<Vec<ImagePrediction>> {
    let json = fs::read_to_string(path).map_err(|e| ScoreError::io(path, e))?;
    Ok(serde_json::from_str(&json)?)
}

/// Read a JSON array of ground-truth annotation boxes
pub fn load_ground_truth_boxes(path: &Path) -> Result<Vec<GroundTruthBoxes>> {
    let json = fs::read_to_string(path).map_err(|e| ScoreError::io(path, e))?;
    Ok(serde_json::from_str(&json)?)
}
