//! Common fixtures for lofar_score integration tests
//!
//! Builds the two-source field used throughout: a single-component source
//! `S1`, a two-component source `S2` and an unrelated neighbour `N1`, all
//! placed through the cutout WCS so their projected positions land on exact
//! image pixels.

use lofar_score::wcs::Wcs;
use lofar_score::{ImagePrediction, ScoreConfig};
use test_helpers::{write_catalog, write_cutout, CatalogRow, CutoutWcs, RunDirs};

/// Side length of the prediction images
pub const IMSIZE: f64 = 20.0;

pub struct Field {
    pub dirs: RunDirs,
    pub config: ScoreConfig,
}

/// Sky position of an image-space pixel (y down) with scale factor 1.
fn sky_at(wcs: &Wcs, x_image: f64, y_image: f64) -> (f64, f64) {
    wcs.pixel_to_world(x_image, IMSIZE - y_image, 0)
        .expect("pixel inside the projection domain")
}

/// Write cutouts for `focus_names` and the component catalog.
pub fn build_field(focus_names: &[&str]) -> Field {
    test_helpers::init_test_logging();
    let dirs = RunDirs::new().unwrap();

    let cutout = CutoutWcs::centered(180.0, 45.0, IMSIZE as usize, 1.5);
    let mut wcs = None;
    for name in focus_names {
        let path = write_cutout(&dirs.fits_dir, name, &cutout).unwrap();
        wcs = Some(Wcs::from_fits(&path).unwrap());
    }
    let wcs = wcs.unwrap_or_else(|| {
        let path = write_cutout(&dirs.fits_dir, "reference", &cutout).unwrap();
        Wcs::from_fits(&path).unwrap()
    });

    let (c1_ra, c1_dec) = sky_at(&wcs, 10.0, 10.0);
    let (c2a_ra, c2a_dec) = sky_at(&wcs, 5.0, 5.0);
    let (c2b_ra, c2b_dec) = sky_at(&wcs, 6.0, 6.0);
    let (n1_ra, n1_dec) = sky_at(&wcs, 10.5, 10.5);

    write_catalog(
        &dirs.catalog_path,
        &[
            CatalogRow::new("S1", "C1", c1_ra, c1_dec),
            CatalogRow::new("S2", "C2a", c2a_ra, c2a_dec),
            CatalogRow::new("S2", "C2b", c2b_ra, c2b_dec),
            CatalogRow::new("N1", "N1a", n1_ra, n1_dec),
            CatalogRow::new("S3", "C3", 190.0, 30.0),
        ],
    )
    .unwrap();

    let config = ScoreConfig {
        dataset_name: "lgz_test".to_string(),
        component_catalog_path: dirs.catalog_path.clone(),
        fits_dir: dirs.fits_dir.clone(),
        output_dir: Some(dirs.output_dir.clone()),
        scale_factor: 1.0,
        imsize: IMSIZE,
        ..Default::default()
    };
    Field { dirs, config }
}

pub fn prediction(
    image_id: u64,
    focus_name: &str,
    pred_boxes: Vec<[f64; 4]>,
    scores: Vec<f64>,
) -> ImagePrediction {
    ImagePrediction {
        image_id,
        file_name: format!("/data/all/{focus_name}_radio_DR2_rotated0deg.png"),
        pred_boxes,
        scores,
        image_size: Some([IMSIZE as u32, IMSIZE as u32]),
    }
}

/// `S1` is covered together with the neighbour, `S2` only half.
///
/// The `S2` image is keyed by its component `C2a` so the focus pixel is that
/// component's position rather than the source centroid.
pub fn scenario_predictions() -> Vec<ImagePrediction> {
    vec![
        prediction(
            0,
            "S1",
            vec![[0.0, 0.0, 2.0, 2.0], [9.0, 9.0, 11.0, 11.0]],
            vec![0.99, 0.9],
        ),
        prediction(1, "C2a", vec![[4.0, 4.0, 5.5, 5.5]], vec![0.8]),
    ]
}
