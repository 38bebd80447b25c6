//! Celestial WCS for cutout images.
//!
//! Supports the zenithal projections used for LoTSS cutouts (`SIN`) and the
//! gnomonic projection (`TAN`), each with the native pole at the reference
//! point (default `LONPOLE = 180`). The linear part comes from `CDi_j`,
//! `PCi_j × CDELTi`, or `CDELTi` with `CROTA2`, in that order of preference.
//! Distortion terms (SIP) are not modelled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fitsio::FitsFile;
use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

use crate::geometry::PixelLocation;

/// Reasons a cutout WCS cannot be used. The affected source is skipped.
#[derive(Error, Debug)]
pub enum WcsError {
    #[error("cannot read FITS header of {path}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: fitsio::errors::Error,
    },

    #[error("missing WCS keyword {0}")]
    MissingKeyword(&'static str),

    #[error("unsupported celestial axes {ctype1:?}/{ctype2:?}")]
    UnsupportedProjection { ctype1: String, ctype2: String },

    #[error("WCS linear transform is singular")]
    SingularMatrix,
}

/// Numeric keywords that take part in the celestial transform
const NUMERIC_KEYWORDS: [&str; 15] = [
    "CRPIX1", "CRPIX2", "CRVAL1", "CRVAL2", "CDELT1", "CDELT2", "CD1_1", "CD1_2", "CD2_1",
    "CD2_2", "PC1_1", "PC1_2", "PC2_1", "PC2_2", "CROTA2",
];

/// Celestial WCS keywords of a primary header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WcsKeywords {
    ctype1: Option<String>,
    ctype2: Option<String>,
    values: HashMap<String, f64>,
}

impl WcsKeywords {
    pub fn new(ctype1: &str, ctype2: &str) -> Self {
        Self {
            ctype1: Some(ctype1.to_string()),
            ctype2: Some(ctype2.to_string()),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, keyword: &str, value: f64) -> Self {
        self.values.insert(keyword.to_string(), value);
        self
    }

    /// Read the WCS keywords of the primary HDU. Absent keywords stay unset.
    pub fn read_primary(path: &Path) -> Result<Self, WcsError> {
        let fits_error = |source| WcsError::Fits {
            path: path.to_path_buf(),
            source,
        };
        let mut fptr = FitsFile::open(path).map_err(fits_error)?;
        let hdu = fptr.primary_hdu().map_err(fits_error)?;

        let mut read_ctype = |key: &str| {
            hdu.read_key::<String>(&mut fptr, key)
                .ok()
                .map(|value| value.trim_end().to_string())
        };
        let ctype1 = read_ctype("CTYPE1");
        let ctype2 = read_ctype("CTYPE2");

        let values = NUMERIC_KEYWORDS
            .iter()
            .filter_map(|key| {
                hdu.read_key::<f64>(&mut fptr, key)
                    .ok()
                    .map(|value| (key.to_string(), value))
            })
            .collect();

        Ok(Self {
            ctype1,
            ctype2,
            values,
        })
    }

    fn get(&self, keyword: &str) -> Option<f64> {
        self.values.get(keyword).copied()
    }

    fn contains(&self, keyword: &str) -> bool {
        self.values.contains_key(keyword)
    }
}

/// Zenithal projection code from CTYPEi
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Gnomonic
    Tan,
    /// Slant orthographic with zero obliquity
    Sin,
}

impl Projection {
    fn from_ctypes(ctype1: &str, ctype2: &str) -> Result<Self, WcsError> {
        let unsupported = || WcsError::UnsupportedProjection {
            ctype1: ctype1.to_string(),
            ctype2: ctype2.to_string(),
        };

        if !ctype1.starts_with("RA--") || !ctype2.starts_with("DEC-") {
            return Err(unsupported());
        }
        let code1 = ctype1.get(5..8).ok_or_else(unsupported)?;
        let code2 = ctype2.get(5..8).ok_or_else(unsupported)?;
        if code1 != code2 {
            return Err(unsupported());
        }
        match code1 {
            "TAN" => Ok(Projection::Tan),
            "SIN" => Ok(Projection::Sin),
            _ => Err(unsupported()),
        }
    }
}

/// Sky-to-pixel transform of one cutout
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel, 1-based FITS convention
    pub crpix: [f64; 2],
    /// Reference sky position (RA, Dec) in degrees
    pub crval: [f64; 2],
    /// Pixel offsets -> intermediate world coordinates (degrees)
    cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
    pub projection: Projection,
}

impl Wcs {
    pub fn new(
        crpix: [f64; 2],
        crval: [f64; 2],
        cd: Matrix2<f64>,
        projection: Projection,
    ) -> Result<Self, WcsError> {
        let cd_inv = cd.try_inverse().ok_or(WcsError::SingularMatrix)?;
        Ok(Self {
            crpix,
            crval,
            cd,
            cd_inv,
            projection,
        })
    }

    /// Build from header keywords of the first two axes.
    pub fn from_keywords(header: &WcsKeywords) -> Result<Self, WcsError> {
        let required = |key: &'static str| header.get(key).ok_or(WcsError::MissingKeyword(key));

        let ctype1 = header
            .ctype1
            .as_deref()
            .ok_or(WcsError::MissingKeyword("CTYPE1"))?;
        let ctype2 = header
            .ctype2
            .as_deref()
            .ok_or(WcsError::MissingKeyword("CTYPE2"))?;
        let projection = Projection::from_ctypes(ctype1, ctype2)?;

        let crpix = [required("CRPIX1")?, required("CRPIX2")?];
        let crval = [required("CRVAL1")?, required("CRVAL2")?];

        let cd = if header.contains("CD1_1") || header.contains("CD2_2") {
            let cd_or_zero = |key| header.get(key).unwrap_or(0.0);
            Matrix2::new(
                cd_or_zero("CD1_1"),
                cd_or_zero("CD1_2"),
                cd_or_zero("CD2_1"),
                cd_or_zero("CD2_2"),
            )
        } else {
            let cdelt1 = required("CDELT1")?;
            let cdelt2 = required("CDELT2")?;
            let has_pc = ["PC1_1", "PC1_2", "PC2_1", "PC2_2"]
                .iter()
                .any(|k| header.contains(k));
            if has_pc {
                let pc = |key, default| header.get(key).unwrap_or(default);
                Matrix2::new(
                    cdelt1 * pc("PC1_1", 1.0),
                    cdelt1 * pc("PC1_2", 0.0),
                    cdelt2 * pc("PC2_1", 0.0),
                    cdelt2 * pc("PC2_2", 1.0),
                )
            } else {
                let rho = header.get("CROTA2").unwrap_or(0.0).to_radians();
                Matrix2::new(
                    cdelt1 * rho.cos(),
                    -cdelt2 * rho.sin(),
                    cdelt1 * rho.sin(),
                    cdelt2 * rho.cos(),
                )
            }
        };

        Self::new(crpix, crval, cd, projection)
    }

    /// Read the primary header of a FITS file and build its WCS
    pub fn from_fits(path: &Path) -> Result<Self, WcsError> {
        Self::from_keywords(&WcsKeywords::read_primary(path)?)
    }

    /// Project a sky position (degrees) to pixel coordinates.
    ///
    /// `origin` is 0 for array indexing and 1 for the FITS convention.
    /// Positions outside the projection domain come back as NaN.
    pub fn world_to_pixel(&self, ra_deg: f64, dec_deg: f64, origin: u8) -> PixelLocation {
        let Some((x, y)) = self.project(ra_deg, dec_deg) else {
            return PixelLocation::UNDEFINED;
        };
        let offset = self.cd_inv * Vector2::new(x, y);
        let shift = 1.0 - origin as f64;
        PixelLocation::new(
            offset.x + self.crpix[0] - shift,
            offset.y + self.crpix[1] - shift,
        )
    }

    /// Inverse of [`Wcs::world_to_pixel`]; `None` outside the projection domain.
    pub fn pixel_to_world(&self, x: f64, y: f64, origin: u8) -> Option<(f64, f64)> {
        let shift = 1.0 - origin as f64;
        let world = self.cd * Vector2::new(x + shift - self.crpix[0], y + shift - self.crpix[1]);
        self.deproject(world.x, world.y)
    }

    /// Sky position -> intermediate world coordinates in degrees
    fn project(&self, ra_deg: f64, dec_deg: f64) -> Option<(f64, f64)> {
        let (ra, dec) = (ra_deg.to_radians(), dec_deg.to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let da = ra - ra0;

        let cos_dec = dec.cos();
        let sin_dec = dec.sin();
        let cos_dec0 = dec0.cos();
        let sin_dec0 = dec0.sin();
        let cos_da = da.cos();

        // Cosine of the angular distance to the reference point
        let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
        let xi = cos_dec * da.sin();
        let eta = sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da;

        let (x, y) = match self.projection {
            Projection::Tan => {
                if denom.is_nan() || denom <= 1e-12 {
                    return None;
                }
                (xi / denom, eta / denom)
            }
            Projection::Sin => {
                if denom.is_nan() || denom < 0.0 {
                    return None;
                }
                (xi, eta)
            }
        };
        Some((x.to_degrees(), y.to_degrees()))
    }

    /// Intermediate world coordinates (degrees) -> sky position (degrees)
    fn deproject(&self, x_deg: f64, y_deg: f64) -> Option<(f64, f64)> {
        let (xi, eta) = (x_deg.to_radians(), y_deg.to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let rho = (xi * xi + eta * eta).sqrt();
        if rho < 1e-15 {
            return Some((self.crval[0], self.crval[1]));
        }

        let c = match self.projection {
            Projection::Tan => rho.atan(),
            Projection::Sin => {
                if rho > 1.0 {
                    return None;
                }
                rho.asin()
            }
        };
        let (sin_c, cos_c) = c.sin_cos();
        let dec = (cos_c * dec0.sin() + eta * sin_c * dec0.cos() / rho).asin();
        let ra = ra0 + (xi * sin_c).atan2(rho * dec0.cos() * cos_c - eta * dec0.sin() * sin_c);
        Some((ra.to_degrees().rem_euclid(360.0), dec.to_degrees()))
    }
}

/// Load-once store of cutout WCSs keyed by FITS path
#[derive(Debug, Default)]
pub struct WcsCache {
    loaded: Mutex<HashMap<PathBuf, Arc<Wcs>>>,
}

impl WcsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached WCS for `path`, reading the FITS header on first use.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Wcs>, WcsError> {
        if let Some(wcs) = self.lock().get(path) {
            return Ok(Arc::clone(wcs));
        }

        let wcs = Arc::new(Wcs::from_fits(path)?);
        self.lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::clone(&wcs));
        Ok(wcs)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<Wcs>>> {
        // A poisoned map still holds fully inserted entries
        self.loaded.lock().unwrap_or_else(|e| e.into_inner())
    }
}
