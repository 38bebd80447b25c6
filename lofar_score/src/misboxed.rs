//! Collection of failing images for visual inspection.
//!
//! Rendering is left to external tooling; the default sink writes one JSON
//! manifest per failure category with everything needed to draw the selected
//! box and the ground truth on top of the cutout.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classifier::FailureCategory;
use crate::error::{Result, ScoreError};
use crate::geometry::{BoundingBox, ImageFrame};
use crate::projector::{GroundTruthLocations, LocationArrays};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Everything needed to render one failing image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisboxedRecord {
    /// Position in the prediction list
    pub index: usize,
    pub image_id: u64,
    pub file_name: String,
    pub focus_name: String,
    pub selected_box: BoundingBox,
    pub score: f64,
    /// Image-space focus position
    pub focus: (f64, f64),
    /// Image-space positions of the source's own components
    pub components: Vec<(f64, f64)>,
    /// Image-space positions of unassociated components
    pub close_components: Vec<(f64, f64)>,
}

impl MisboxedRecord {
    /// Convert catalog-projection pixels to image space for drawing.
    pub fn image_space_locations(
        locations: &GroundTruthLocations,
        frame: &ImageFrame,
    ) -> ((f64, f64), Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let convert = |locs: &LocationArrays| -> Vec<(f64, f64)> {
            locs.iter().map(|(x, y)| frame.to_image(x, y)).collect()
        };
        (
            frame.to_image(locations.focus_loc.x, locations.focus_loc.y),
            convert(&locations.component_locs),
            convert(&locations.close_component_locs),
        )
    }
}

/// Per-category list written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisboxedManifest {
    pub category: String,
    pub images: Vec<MisboxedRecord>,
}

/// Receiver of failing images, called once per category
pub trait MisboxedSink {
    fn collect(&mut self, category: FailureCategory, records: &[MisboxedRecord]) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MisboxedSink for NullSink {
    fn collect(&mut self, _category: FailureCategory, _records: &[MisboxedRecord]) -> Result<()> {
        Ok(())
    }
}

/// Writes `{output_dir}/{category}/manifest.json`
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    output_dir: PathBuf,
}

impl ManifestWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn category_dir(&self, category: FailureCategory) -> PathBuf {
        self.output_dir.join(category.key())
    }
}

impl MisboxedSink for ManifestWriter {
    fn collect(&mut self, category: FailureCategory, records: &[MisboxedRecord]) -> Result<()> {
        let dir = self.category_dir(category);
        fs::create_dir_all(&dir).map_err(|e| ScoreError::io(&dir, e))?;
        clear_render_dir(&dir)?;

        let manifest = MisboxedManifest {
            category: category.key().to_string(),
            images: records.to_vec(),
        };
        let path = dir.join(MANIFEST_FILE_NAME);
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&path, json).map_err(|e| ScoreError::io(&path, e))?;

        log::info!(
            "Collected {} misboxed images for {} in {}",
            records.len(),
            category,
            dir.display()
        );
        Ok(())
    }
}

/// Empty a category directory that only holds earlier renders and manifests.
fn clear_render_dir(dir: &Path) -> Result<()> {
    let mut stale = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ScoreError::io(dir, e))? {
        let entry = entry.map_err(|e| ScoreError::io(dir, e))?;
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let is_png = path.extension().is_some_and(|ext| ext == "png");
        let is_manifest = path.file_name().is_some_and(|name| name == MANIFEST_FILE_NAME);
        if !is_file || !(is_png || is_manifest) {
            return Err(ScoreError::UnexpectedFiles(dir.to_path_buf()));
        }
        stale.push(path);
    }

    for path in stale {
        fs::remove_file(&path).map_err(|e| ScoreError::io(&path, e))?;
    }
    Ok(())
}
