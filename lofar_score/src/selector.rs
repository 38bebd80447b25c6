//! Prediction records and central-box selection.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};
use crate::geometry::{BoundingBox, ImageFrame, PixelLocation};

/// Detector output for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePrediction {
    pub image_id: u64,
    pub file_name: String,
    /// Boxes as `[xmin, ymin, xmax, ymax]` in image-array pixels
    pub pred_boxes: Vec<[f64; 4]>,
    /// Confidence of each box, same length as `pred_boxes`
    pub scores: Vec<f64>,
    /// `[height, width]` of the input image as reported by the detector.
    ///
    /// Informational only: the vertical flip always uses the configured
    /// `imsize`, so every image of a run shares one frame.
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
}

impl ImagePrediction {
    /// Check that boxes and scores line up, scores lie in `[0, 1]` and every
    /// box is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.pred_boxes.len() != self.scores.len() {
            return Err(ScoreError::MalformedPrediction {
                image_id: self.image_id,
                reason: format!(
                    "{} boxes but {} scores",
                    self.pred_boxes.len(),
                    self.scores.len()
                ),
            });
        }
        if let Some(score) = self
            .scores
            .iter()
            .find(|s| !(0.0..=1.0).contains(*s))
        {
            return Err(ScoreError::MalformedPrediction {
                image_id: self.image_id,
                reason: format!("score {score} outside [0, 1]"),
            });
        }
        for coords in &self.pred_boxes {
            BoundingBox::from_array(*coords)?;
        }
        Ok(())
    }

    /// Validate and pair each box with its score.
    pub fn scored_boxes(&self) -> Result<Vec<ScoredPrediction>> {
        self.validate()?;
        self.pred_boxes
            .iter()
            .zip(&self.scores)
            .map(|(coords, &score)| {
                Ok(ScoredPrediction {
                    bbox: BoundingBox::from_array(*coords)?,
                    score,
                })
            })
            .collect()
    }
}

/// A predicted box and its confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPrediction {
    pub bbox: BoundingBox,
    pub score: f64,
}

impl ScoredPrediction {
    /// Placeholder used when no prediction covers the focus source
    pub const NONE: ScoredPrediction = ScoredPrediction {
        bbox: BoundingBox::SENTINEL,
        score: 0.0,
    };
}

/// Select the highest-scoring box that covers the focus source.
///
/// The focus location is in catalog-projection pixels and is moved into
/// image space with `frame` before testing. Boxes are compared in input
/// order, so the first of several equal scores wins.
///
/// # Returns
/// The chosen prediction, or [`ScoredPrediction::NONE`] when no box covers
/// the focus.
pub fn select_central_box(
    predictions: &[ScoredPrediction],
    focus_loc: PixelLocation,
    frame: &ImageFrame,
) -> ScoredPrediction {
    let mut best: Option<&ScoredPrediction> = None;
    for pred in predictions
        .iter()
        .filter(|p| frame.box_contains(&p.bbox, focus_loc.x, focus_loc.y))
    {
        // Strictly greater keeps the earliest of equal scores
        if best.map_or(true, |b| pred.score > b.score) {
            best = Some(pred);
        }
    }
    best.copied().unwrap_or(ScoredPrediction::NONE)
}
