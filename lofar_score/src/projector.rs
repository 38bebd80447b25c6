//! Sky-to-pixel projection of the ground truth of every focus source.
//!
//! Each focus source has its own cutout and therefore its own WCS. Projection
//! uses `origin = 0` (array indexing). Positions outside a projection domain
//! become NaN and are simply never contained in a box, but a source whose
//! focus position or FITS header cannot be projected is skipped as a whole.

use std::path::PathBuf;

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogIndexer, Component, FocusEntry};
use crate::geometry::PixelLocation;
use crate::wcs::{Wcs, WcsCache};

/// Projected x and y coordinates of a list of components
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationArrays {
    pub xs: Array1<f64>,
    pub ys: Array1<f64>,
}

impl LocationArrays {
    fn project(wcs: &Wcs, components: &[Component]) -> Self {
        let (xs, ys): (Vec<f64>, Vec<f64>) = components
            .iter()
            .map(|c| {
                let loc = wcs.world_to_pixel(c.ra, c.dec, 0);
                (loc.x, loc.y)
            })
            .unzip();
        Self {
            xs: Array1::from(xs),
            ys: Array1::from(ys),
        }
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }
}

/// Pixel-space ground truth for one focus source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthLocations {
    pub focus_loc: PixelLocation,
    /// Components of the focus source
    pub component_locs: LocationArrays,
    /// Unassociated components inside the search box
    pub close_component_locs: LocationArrays,
}

/// Why a source was left out of the statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    /// FITS file unreadable or WCS unsupported
    Wcs { fits_path: PathBuf, message: String },
    /// The focus position falls outside the projection domain
    FocusOutsideDomain,
}

/// Projection outcome of one focus source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceProjection {
    Projected(GroundTruthLocations),
    Skipped(SkipReason),
}

impl SourceProjection {
    pub fn locations(&self) -> Option<&GroundTruthLocations> {
        match self {
            SourceProjection::Projected(locs) => Some(locs),
            SourceProjection::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SourceProjection::Skipped(_))
    }
}

/// Projects catalog entries through the WCS of their cutout
#[derive(Debug, Default)]
pub struct CoordinateProjector {
    wcs_cache: WcsCache,
    parallel: bool,
}

impl CoordinateProjector {
    pub fn new(parallel: bool) -> Self {
        Self {
            wcs_cache: WcsCache::new(),
            parallel,
        }
    }

    /// Project every entry of the indexer, keeping image order.
    pub fn project_all(&self, indexer: &CatalogIndexer) -> Vec<SourceProjection> {
        let projections: Vec<SourceProjection> = if self.parallel {
            indexer
                .entries()
                .par_iter()
                .map(|entry| self.project_entry(entry))
                .collect()
        } else {
            indexer
                .entries()
                .iter()
                .map(|entry| self.project_entry(entry))
                .collect()
        };

        let skipped = projections.iter().filter(|p| p.is_skipped()).count();
        if skipped > 0 {
            log::warn!(
                "{} of {} sources could not be projected and are excluded from the score",
                skipped,
                projections.len()
            );
        }
        log::debug!("Loaded {} cutout WCS headers", self.wcs_cache.len());
        projections
    }

    /// Project the focus, own components and close components of one entry.
    pub fn project_entry(&self, entry: &FocusEntry) -> SourceProjection {
        let wcs = match self.wcs_cache.get_or_load(&entry.fits_path) {
            Ok(wcs) => wcs,
            Err(e) => {
                log::warn!("Skipping {}: {}", entry.focus_name, e);
                return SourceProjection::Skipped(SkipReason::Wcs {
                    fits_path: entry.fits_path.clone(),
                    message: e.to_string(),
                });
            }
        };

        let focus_loc = wcs.world_to_pixel(entry.ra, entry.dec, 0);
        if !focus_loc.is_defined() {
            log::warn!(
                "Skipping {}: focus position ({}, {}) is outside the WCS domain of {}",
                entry.focus_name,
                entry.ra,
                entry.dec,
                entry.fits_path.display()
            );
            return SourceProjection::Skipped(SkipReason::FocusOutsideDomain);
        }

        SourceProjection::Projected(GroundTruthLocations {
            focus_loc,
            component_locs: LocationArrays::project(&wcs, &entry.components),
            close_component_locs: LocationArrays::project(&wcs, &entry.close_components),
        })
    }
}
