use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};
use crate::geometry::ImageFrame;

/// Default neighbour search radius around the focus source
pub const DEFAULT_SEARCH_RADIUS_ARCSEC: f64 = 200.0;

/// Default cutout side length in pixels
pub const DEFAULT_IMSIZE: f64 = 200.0;

/// Configuration for a LOFAR score evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    /// Name of the evaluated dataset split (e.g. "LGZ_v5_val")
    pub dataset_name: String,
    /// Component catalog CSV with Source_Name, Component_Name, RA, DEC columns
    pub component_catalog_path: PathBuf,
    /// Directory holding `{source}_radio_DR2.fits` cutouts
    pub fits_dir: PathBuf,
    /// Directory for cache artifacts, saved predictions and misboxed manifests
    pub output_dir: Option<PathBuf>,
    /// Radius (arcsec) of the box query for unassociated neighbours
    pub search_radius_arcsec: f64,
    /// Ratio between prediction-image pixels and FITS pixels
    pub scale_factor: f64,
    /// Side length of the prediction image in pixels
    pub imsize: f64,
    /// Recompute cached ground truth even if artifacts exist
    pub overwrite: bool,
    /// Suffix distinguishing cache artifacts of the same output dir
    pub save_appendix: String,
    /// Project sources on the rayon pool instead of sequentially
    pub parallel: bool,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            dataset_name: String::new(),
            component_catalog_path: PathBuf::new(),
            fits_dir: PathBuf::new(),
            output_dir: None,
            search_radius_arcsec: DEFAULT_SEARCH_RADIUS_ARCSEC,
            scale_factor: 1.0,
            imsize: DEFAULT_IMSIZE,
            overwrite: false,
            save_appendix: String::new(),
            parallel: false,
        }
    }
}

impl ScoreConfig {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| ScoreError::io(path, e))?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ScoreError::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.search_radius_arcsec.is_finite() && self.search_radius_arcsec >= 0.0) {
            return Err(ScoreError::InvalidConfig(format!(
                "search_radius_arcsec must be finite and non-negative, got {}",
                self.search_radius_arcsec
            )));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(ScoreError::InvalidConfig(format!(
                "scale_factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if !(self.imsize.is_finite() && self.imsize > 0.0) {
            return Err(ScoreError::InvalidConfig(format!(
                "imsize must be positive, got {}",
                self.imsize
            )));
        }
        Ok(())
    }

    pub fn search_radius_deg(&self) -> f64 {
        self.search_radius_arcsec / 3600.0
    }

    pub fn image_frame(&self) -> ImageFrame {
        ImageFrame::new(self.scale_factor, self.imsize)
    }

    /// Cache key suffix; falls back to the dataset name like the evaluator does.
    pub fn effective_appendix(&self) -> &str {
        if self.save_appendix.is_empty() {
            &self.dataset_name
        } else {
            &self.save_appendix
        }
    }
}
