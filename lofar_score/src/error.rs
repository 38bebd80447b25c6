use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while scoring predictions against the component catalog.
///
/// Fatal variants signal upstream data corruption and abort the run.
/// Per-source problems (unreadable FITS, unsupported WCS) are reported
/// through [`SkipReason`](crate::projector::SkipReason) instead.
#[derive(Error, Debug)]
pub enum ScoreError {
    /// The same focus source appears in more than one evaluated image.
    #[error("duplicate focus source names in prediction set: {}", .0.join(", "))]
    DuplicateSourceNames(Vec<String>),

    /// A focus name matched neither a component nor a source in the catalog.
    #[error("catalog lookup failed for focus source '{0}'")]
    CatalogLookup(String),

    /// Bounding box with inverted or non-finite edges.
    #[error("malformed bounding box ({xmin}, {ymin}, {xmax}, {ymax})")]
    MalformedBox {
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },

    /// Prediction record whose box and score lists disagree, or whose
    /// scores fall outside `[0, 1]`.
    #[error("malformed prediction for image {image_id}: {reason}")]
    MalformedPrediction { image_id: u64, reason: String },

    /// Predictions and ground truth do not describe the same images.
    #[error("ground truth covers {ground_truth} images but {predictions} predictions were given")]
    GroundTruthMismatch {
        ground_truth: usize,
        predictions: usize,
    },

    /// Catalog file could not be parsed.
    #[error("catalog error: {0}")]
    Catalog(#[from] csv::Error),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cache artifact could not be written.
    #[error("cache encode error: {0}")]
    CacheEncode(#[from] bincode::error::EncodeError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Refused to clear a directory that holds foreign files.
    #[error("refusing to clear {0}: directory contains files other than images")]
    UnexpectedFiles(PathBuf),
}

impl ScoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoreError>;
