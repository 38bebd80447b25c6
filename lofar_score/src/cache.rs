//! Memoization of the catalog lookup and projection stages.
//!
//! Resolving focus sources and reading one FITS header per image dominates the
//! runtime of an evaluation, and its output only depends on the catalog, the
//! cutouts and the evaluated image list. The artifact is written with bincode
//! so NaN coordinates survive a reload bit for bit.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::CatalogIndexer;
use crate::error::{Result, ScoreError};
use crate::projector::SourceProjection;

/// Bumped whenever the artifact layout changes
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Output of the indexer and projector for one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub indexer: CatalogIndexer,
    /// One entry per indexer entry, same order
    pub projections: Vec<SourceProjection>,
}

#[derive(Serialize, Deserialize)]
struct CacheArtifact {
    version: u32,
    key: String,
    ground_truth: GroundTruth,
}

/// Identity of the inputs a cached artifact was computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        dataset_name: &str,
        search_radius_arcsec: f64,
        catalog_path: &Path,
        fits_dir: &Path,
        focus_names: &[String],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(dataset_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(search_radius_arcsec.to_bits().to_le_bytes());
        hasher.update(catalog_path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fits_dir.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        for name in focus_names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where the cached ground truth came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Loaded,
    Computed,
}

/// Get-or-compute store for [`GroundTruth`]
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: Option<PathBuf>,
    overwrite: bool,
}

impl ResultCache {
    /// Cache under `{output_dir}/cache/lofar_ground_truth_{appendix}.bin`.
    ///
    /// Without an output directory nothing is persisted.
    pub fn new(output_dir: Option<&Path>, appendix: &str, overwrite: bool) -> Self {
        Self {
            path: output_dir.map(|dir| artifact_path(dir, appendix)),
            overwrite,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the artifact for `key`, or run `compute` and persist its output.
    ///
    /// A missing, unreadable, outdated or foreign artifact counts as a miss.
    /// `overwrite` always recomputes.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<(GroundTruth, CacheStatus)>
    where
        F: FnOnce() -> Result<GroundTruth>,
    {
        let Some(path) = &self.path else {
            return Ok((compute()?, CacheStatus::Computed));
        };

        if !self.overwrite {
            if let Some(ground_truth) = load_artifact(path, key) {
                log::info!("Loaded cached ground truth from {}", path.display());
                return Ok((ground_truth, CacheStatus::Loaded));
            }
        }

        let ground_truth = compute()?;
        store_artifact(path, key, &ground_truth)?;
        log::info!("Saved ground truth to {}", path.display());
        Ok((ground_truth, CacheStatus::Computed))
    }
}

fn artifact_path(output_dir: &Path, appendix: &str) -> PathBuf {
    output_dir
        .join("cache")
        .join(format!("lofar_ground_truth_{appendix}.bin"))
}

fn load_artifact(path: &Path, key: &CacheKey) -> Option<GroundTruth> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("Ignoring unreadable cache {}: {}", path.display(), e);
            return None;
        }
    };

    let artifact: CacheArtifact =
        match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
            Ok((artifact, read)) if read == bytes.len() => artifact,
            Ok(_) => {
                log::warn!("Ignoring cache {} with trailing bytes", path.display());
                return None;
            }
            Err(e) => {
                log::warn!("Ignoring undecodable cache {}: {}", path.display(), e);
                return None;
            }
        };

    if artifact.version != CACHE_FORMAT_VERSION {
        log::info!(
            "Cache {} has format version {}, expected {}",
            path.display(),
            artifact.version,
            CACHE_FORMAT_VERSION
        );
        return None;
    }
    if artifact.key != key.as_str() {
        log::info!("Cache {} was built from different inputs", path.display());
        return None;
    }
    Some(artifact.ground_truth)
}

fn store_artifact(path: &Path, key: &CacheKey, ground_truth: &GroundTruth) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ScoreError::io(parent, e))?;
    }

    let artifact = CacheArtifact {
        version: CACHE_FORMAT_VERSION,
        key: key.as_str().to_string(),
        ground_truth: ground_truth.clone(),
    };
    let bytes = bincode::serde::encode_to_vec(&artifact, bincode::config::standard())?;

    let tmp_path = path.with_extension("bin.tmp");
    fs::write(&tmp_path, bytes).map_err(|e| ScoreError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| ScoreError::io(path, e))
}
