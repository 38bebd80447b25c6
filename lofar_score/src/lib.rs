//! LOFAR score: detection evaluation against multi-component radio sources.
//!
//! For every evaluated cutout the predicted box that covers the focus source
//! with the highest confidence is checked against the component catalog. It
//! fails when it misses the focus, misses associated components, or swallows
//! unassociated neighbours. Outcomes are aggregated into four fail fractions
//! split by single- and multi-component sources.
//!
//! Pipeline: [`catalog::CatalogIndexer`] -> [`projector::CoordinateProjector`]
//! -> [`selector::select_central_box`] -> [`containment::score_containment`]
//! -> [`classifier::classify`], with [`cache::ResultCache`] memoizing the first
//! two stages and [`evaluator::LofarEvaluator`] driving the whole run.

pub mod cache;
pub mod catalog;
pub mod classifier;
pub mod comm;
pub mod config;
pub mod containment;
pub mod error;
pub mod evaluator;
pub mod geometry;
pub mod misboxed;
pub mod projector;
pub mod selector;
pub mod wcs;

pub use crate::classifier::{EvaluationResult, FailureCategory};
pub use crate::config::ScoreConfig;
pub use crate::error::{Result, ScoreError};
pub use crate::evaluator::{EvaluationOutput, LofarEvaluator};
pub use crate::geometry::{BoundingBox, PixelLocation};
pub use crate::selector::{ImagePrediction, ScoredPrediction};
