//! Test fixtures for lofar_score
//!
//! Builds the on-disk inputs of an evaluation run: minimal FITS cutouts that
//! carry only a primary header with celestial WCS keywords, component catalog
//! CSVs and scratch directories.

use fitsio::FitsFile;
use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for fixture operations
#[derive(thiserror::Error, Debug)]
pub enum FixtureError {
    #[error("failed to write fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write FITS fixture {path}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: fitsio::errors::Error,
    },
}

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_test_logging() {
    Lazy::force(&LOGGER);
}

/// Value of a FITS header card
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Float(f64),
    Int(i64),
    Str(String),
}

/// Write a FITS file with an empty primary image and the given header keywords.
pub fn write_fits_header(path: &Path, cards: &[(&str, CardValue)]) -> Result<(), FixtureError> {
    let fits_error = |source| FixtureError::Fits {
        path: path.to_path_buf(),
        source,
    };

    let mut fptr = FitsFile::create(path)
        .overwrite()
        .open()
        .map_err(fits_error)?;
    let hdu = fptr.primary_hdu().map_err(fits_error)?;

    for &(keyword, ref value) in cards {
        let written = match value {
            CardValue::Float(v) => hdu.write_key(&mut fptr, keyword, *v),
            CardValue::Int(v) => hdu.write_key(&mut fptr, keyword, *v),
            CardValue::Str(s) => hdu.write_key(&mut fptr, keyword, s.clone()),
        };
        written.map_err(fits_error)?;
    }
    Ok(())
}

/// Celestial WCS of a synthetic cutout
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutWcs {
    /// Reference sky position (RA, Dec) in degrees
    pub crval: (f64, f64),
    /// Reference pixel, 1-based
    pub crpix: (f64, f64),
    /// Pixel size in degrees; RA runs towards -x
    pub pixel_scale_deg: f64,
    /// Projection code, e.g. "SIN" or "TAN"
    pub projection: String,
}

impl CutoutWcs {
    /// LoTSS-like cutout of `size` pixels centered on `(ra, dec)`
    pub fn centered(ra: f64, dec: f64, size: usize, pixel_scale_arcsec: f64) -> Self {
        let center = size as f64 / 2.0 + 0.5;
        Self {
            crval: (ra, dec),
            crpix: (center, center),
            pixel_scale_deg: pixel_scale_arcsec / 3600.0,
            projection: "SIN".to_string(),
        }
    }

    pub fn with_projection(mut self, projection: &str) -> Self {
        self.projection = projection.to_string();
        self
    }

    pub fn cards(&self) -> Vec<(&'static str, CardValue)> {
        vec![
            ("CTYPE1", CardValue::Str(format!("RA---{}", self.projection))),
            ("CTYPE2", CardValue::Str(format!("DEC--{}", self.projection))),
            ("CRPIX1", CardValue::Float(self.crpix.0)),
            ("CRPIX2", CardValue::Float(self.crpix.1)),
            ("CRVAL1", CardValue::Float(self.crval.0)),
            ("CRVAL2", CardValue::Float(self.crval.1)),
            ("CDELT1", CardValue::Float(-self.pixel_scale_deg)),
            ("CDELT2", CardValue::Float(self.pixel_scale_deg)),
            ("CUNIT1", CardValue::Str("deg".to_string())),
            ("CUNIT2", CardValue::Str("deg".to_string())),
        ]
    }
}

/// Write `{fits_dir}/{focus_name}_radio_DR2.fits` with the given WCS.
pub fn write_cutout(
    fits_dir: &Path,
    focus_name: &str,
    wcs: &CutoutWcs,
) -> Result<PathBuf, FixtureError> {
    let path = fits_dir.join(format!("{focus_name}_radio_DR2.fits"));
    write_fits_header(&path, &wcs.cards())?;
    Ok(path)
}

/// One row of a component catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub source_name: String,
    pub component_name: String,
    pub ra: f64,
    pub dec: f64,
}

impl CatalogRow {
    pub fn new(source_name: &str, component_name: &str, ra: f64, dec: f64) -> Self {
        Self {
            source_name: source_name.to_string(),
            component_name: component_name.to_string(),
            ra,
            dec,
        }
    }
}

/// Write a component catalog CSV with an extra flux column the reader must ignore.
pub fn write_catalog(path: &Path, rows: &[CatalogRow]) -> Result<(), FixtureError> {
    let mut csv = String::from("Source_Name,Component_Name,RA,DEC,Total_flux\n");
    for row in rows {
        csv.push_str(&format!(
            "{},{},{:?},{:?},1.0\n",
            row.source_name, row.component_name, row.ra, row.dec
        ));
    }
    fs::write(path, csv).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Scratch layout of an evaluation run inside a temporary directory
pub struct RunDirs {
    pub root: tempfile::TempDir,
    pub fits_dir: PathBuf,
    pub output_dir: PathBuf,
    pub catalog_path: PathBuf,
}

impl RunDirs {
    pub fn new() -> Result<Self, FixtureError> {
        let root = tempfile::TempDir::new().map_err(|source| FixtureError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let fits_dir = root.path().join("fits");
        fs::create_dir_all(&fits_dir).map_err(|source| FixtureError::Io {
            path: fits_dir.clone(),
            source,
        })?;
        Ok(Self {
            output_dir: root.path().join("output"),
            catalog_path: root.path().join("components.csv"),
            fits_dir,
            root,
        })
    }
}
