//! Counting ground-truth components inside the selected box.

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, ImageFrame};
use crate::projector::{GroundTruthLocations, LocationArrays};

/// Containment counts for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainmentScores {
    /// Own components inside the box
    pub comp_score: usize,
    /// Unassociated components inside the box
    pub close_comp_score: usize,
}

/// Number of locations that fall inside `bbox` after the image-frame transform.
///
/// NaN locations are never counted.
pub fn count_contained(bbox: &BoundingBox, locs: &LocationArrays, frame: &ImageFrame) -> usize {
    locs.iter()
        .filter(|&(x, y)| frame.box_contains(bbox, x, y))
        .count()
}

pub fn score_containment(
    bbox: &BoundingBox,
    gt: &GroundTruthLocations,
    frame: &ImageFrame,
) -> ContainmentScores {
    ContainmentScores {
        comp_score: count_contained(bbox, &gt.component_locs, frame),
        close_comp_score: count_contained(bbox, &gt.close_component_locs, frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelLocation;
    use ndarray::array;

    fn gt() -> GroundTruthLocations {
        // imsize 20, scale 1: catalog y maps to 20 - y
        GroundTruthLocations {
            focus_loc: PixelLocation::new(5.0, 15.0),
            component_locs: LocationArrays {
                xs: array![5.0, 6.0, f64::NAN],
                ys: array![15.0, 14.0, 15.0],
            },
            close_component_locs: LocationArrays {
                xs: array![5.5, 12.0],
                ys: array![14.5, 1.0],
            },
        }
    }

    #[test]
    fn test_counts_with_flip() {
        let frame = ImageFrame::new(1.0, 20.0);
        let bbox = BoundingBox::new(4.0, 4.0, 6.0, 6.0).unwrap();
        let scores = score_containment(&bbox, &gt(), &frame);
        assert_eq!(scores.comp_score, 2);
        assert_eq!(scores.close_comp_score, 1);
    }

    #[test]
    fn test_edges_count_and_nan_does_not() {
        let frame = ImageFrame::new(1.0, 20.0);
        // (6, 6) sits on the corner
        let bbox = BoundingBox::new(5.0, 5.0, 6.0, 6.0).unwrap();
        assert_eq!(count_contained(&bbox, &gt().component_locs, &frame), 2);

        let everything = BoundingBox::new(-100.0, -100.0, 100.0, 100.0).unwrap();
        assert_eq!(count_contained(&everything, &gt().component_locs, &frame), 2);
    }

    #[test]
    fn test_sentinel_contains_nothing() {
        let frame = ImageFrame::new(1.0, 20.0);
        let scores = score_containment(&BoundingBox::SENTINEL, &gt(), &frame);
        assert_eq!(scores, ContainmentScores::default());
    }
}
