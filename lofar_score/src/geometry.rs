//! Pixel-space primitives shared by the selector and the containment scorer.
//!
//! Catalog positions are projected with the FITS convention (origin at the
//! bottom-left, y growing upwards) while predicted boxes live in image-array
//! space (origin at the top-left, y growing downwards). [`ImageFrame`] holds
//! the conversion between the two.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};

/// Axis-aligned prediction box in image-array pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    /// Marker for "no box covers the focus source".
    ///
    /// Every in-frame pixel coordinate is non-negative, so nothing is ever
    /// contained in it.
    pub const SENTINEL: BoundingBox = BoundingBox {
        xmin: -1.0,
        ymin: -1.0,
        xmax: -1.0,
        ymax: -1.0,
    };

    /// Create a box, rejecting inverted or non-finite edges.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        let bbox = Self {
            xmin,
            ymin,
            xmax,
            ymax,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Create a box from `[xmin, ymin, xmax, ymax]`
    pub fn from_array(coords: [f64; 4]) -> Result<Self> {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// Check edge ordering; deserialized boxes bypass [`BoundingBox::new`].
    pub fn validate(&self) -> Result<()> {
        let finite = [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.xmax < self.xmin || self.ymax < self.ymin {
            return Err(ScoreError::MalformedBox {
                xmin: self.xmin,
                ymin: self.ymin,
                xmax: self.xmax,
                ymax: self.ymax,
            });
        }
        Ok(())
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// Closed-interval containment on all four edges.
    ///
    /// NaN coordinates are never contained.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        is_within(x, y, self.xmin, self.ymin, self.xmax, self.ymax)
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Overlapping region, or `None` when the boxes are disjoint.
    pub fn intersection(&self, other: &Self) -> Option<BoundingBox> {
        let xmin = self.xmin.max(other.xmin);
        let ymin = self.ymin.max(other.ymin);
        let xmax = self.xmax.min(other.xmax);
        let ymax = self.ymax.min(other.ymax);
        if xmax < xmin || ymax < ymin {
            return None;
        }
        Some(BoundingBox {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// Intersection over union, 0 for disjoint or zero-area pairs.
    pub fn iou(&self, other: &Self) -> f64 {
        let Some(overlap) = self.intersection(other) else {
            return 0.0;
        };
        let intersection = overlap.area();
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// Return true if `(x, y)` lies inside `[xmin, xmax] × [ymin, ymax]`.
pub fn is_within(x: f64, y: f64, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> bool {
    xmin <= x && x <= xmax && ymin <= y && y <= ymax
}

/// Pixel position produced by a WCS projection; NaN when undefined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelLocation {
    pub x: f64,
    pub y: f64,
}

impl PixelLocation {
    pub const UNDEFINED: PixelLocation = PixelLocation {
        x: f64::NAN,
        y: f64::NAN,
    };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_defined(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Conversion from catalog-projection pixels to prediction-box pixels.
///
/// `y_image = imsize - y_catalog * scale_factor` is load-bearing: FITS rows
/// run bottom-up, image-array rows run top-down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub scale_factor: f64,
    pub imsize: f64,
}

impl ImageFrame {
    pub fn new(scale_factor: f64, imsize: f64) -> Self {
        Self {
            scale_factor,
            imsize,
        }
    }

    /// Map a catalog pixel location into prediction-box space.
    pub fn to_image(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale_factor, self.imsize - y * self.scale_factor)
    }

    /// Check whether a catalog pixel location falls inside `bbox`.
    pub fn box_contains(&self, bbox: &BoundingBox, x: f64, y: f64) -> bool {
        let (ix, iy) = self.to_image(x, y);
        bbox.contains(ix, iy)
    }
}
