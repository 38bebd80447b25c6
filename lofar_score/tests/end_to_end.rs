mod common;

use std::fs;
use std::thread;

use approx::assert_relative_eq;
use common::{build_field, prediction, scenario_predictions};
use lofar_score::cache::{CacheKey, CacheStatus, GroundTruth, ResultCache};
use lofar_score::catalog::{CatalogIndexer, ComponentCatalog};
use lofar_score::comm::LocalGroup;
use lofar_score::evaluator::{GroundTruthBoxes, PREDICTIONS_FILE_NAME};
use lofar_score::misboxed::{ManifestWriter, MisboxedManifest, MANIFEST_FILE_NAME};
use lofar_score::projector::{CoordinateProjector, LocationArrays};
use lofar_score::{FailureCategory, LofarEvaluator, ScoreConfig, ScoreError};

#[test]
fn test_scenario_fail_fractions() {
    let field = build_field(&["S1", "C2a"]);
    let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
    evaluator.reset();
    evaluator.process(scenario_predictions());

    let output = evaluator.evaluate().unwrap().unwrap();
    assert_eq!(output.evaluated, 2);
    assert_eq!(output.skipped, 0);

    let result = output.result;
    assert_eq!(result.assoc_single_fail_fraction, 0.0);
    assert_eq!(result.assoc_multi_fail_fraction, 1.0);
    // The S1 box also encloses the unrelated N1 component
    assert_eq!(result.unassoc_single_fail_fraction, 1.0);
    assert_eq!(result.unassoc_multi_fail_fraction, 0.0);

    assert_eq!(output.failing_indices[&FailureCategory::AssocMulti], vec![1]);
    assert_eq!(output.failing_indices[&FailureCategory::UnassocSingle], vec![0]);
    assert!(output.failing_indices[&FailureCategory::AssocSingle].is_empty());

    assert!(field.dirs.output_dir.join(PREDICTIONS_FILE_NAME).exists());
}

#[test]
fn test_missing_cutout_skips_source() {
    let field = build_field(&["S1", "C2a"]);
    let mut predictions = scenario_predictions();
    // S3 is in the catalog but has no cutout on disk
    predictions.push(prediction(2, "S3", vec![[0.0, 0.0, 20.0, 20.0]], vec![0.5]));

    let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
    evaluator.process(predictions);
    let output = evaluator.evaluate().unwrap().unwrap();

    assert_eq!(output.evaluated, 2);
    assert_eq!(output.skipped, 1);
    assert_eq!(output.result.assoc_single_fail_fraction, 0.0);
    assert_eq!(output.result.assoc_multi_fail_fraction, 1.0);
}

#[test]
fn test_unsupported_projection_skips_source() {
    let field = build_field(&["S1", "C2a"]);
    let cutout = test_helpers::CutoutWcs::centered(180.0, 45.0, 20, 1.5).with_projection("CAR");
    test_helpers::write_cutout(&field.dirs.fits_dir, "S1", &cutout).unwrap();

    let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
    evaluator.process(scenario_predictions());
    let output = evaluator.evaluate().unwrap().unwrap();

    assert_eq!(output.skipped, 1);
    assert!(output.result.assoc_single_fail_fraction.is_nan());
    assert!(output.result.unassoc_single_fail_fraction.is_nan());
    assert_eq!(output.result.assoc_multi_fail_fraction, 1.0);
}

#[test]
fn test_unknown_focus_is_fatal() {
    let field = build_field(&["S1"]);
    let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
    evaluator.process(vec![prediction(0, "ILTJ000000.00+000000.0", vec![], vec![])]);
    assert!(matches!(
        evaluator.evaluate(),
        Err(ScoreError::CatalogLookup(name)) if name == "ILTJ000000.00+000000.0"
    ));
}

#[test]
fn test_inverted_box_aborts_evaluation() {
    let field = build_field(&["S1", "C2a"]);
    let mut predictions = scenario_predictions();
    predictions[0].pred_boxes[1] = [11.0, 9.0, 9.0, 11.0];

    let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
    evaluator.process(predictions);
    assert!(matches!(
        evaluator.evaluate(),
        Err(ScoreError::MalformedBox { xmin, xmax, .. }) if xmin == 11.0 && xmax == 9.0
    ));
}

#[test]
fn test_nan_score_aborts_evaluation() {
    let field = build_field(&["S1", "C2a"]);
    let mut predictions = scenario_predictions();
    predictions[1].scores[0] = f64::NAN;

    let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
    evaluator.process(predictions);
    assert!(matches!(
        evaluator.evaluate(),
        Err(ScoreError::MalformedPrediction { image_id: 1, .. })
    ));
}

#[test]
fn test_cached_ground_truth_reused() {
    let field = build_field(&["S1", "C2a"]);
    let first = {
        let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
        evaluator.process(scenario_predictions());
        evaluator.evaluate().unwrap().unwrap()
    };

    // Without cutouts every source would be skipped, so a match proves a cache hit
    for entry in fs::read_dir(&field.dirs.fits_dir).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }
    let second = {
        let mut evaluator = LofarEvaluator::new(field.config.clone()).unwrap();
        evaluator.process(scenario_predictions());
        evaluator.evaluate().unwrap().unwrap()
    };
    assert_eq!(second, first);

    let overwrite = ScoreConfig {
        overwrite: true,
        ..field.config.clone()
    };
    let mut evaluator = LofarEvaluator::new(overwrite).unwrap();
    evaluator.process(scenario_predictions());
    let recomputed = evaluator.evaluate().unwrap().unwrap();
    assert_eq!(recomputed.skipped, 2);
    assert!(recomputed.result.assoc_single_fail_fraction.is_nan());
}

#[test]
fn test_projector_rerun_is_bit_identical() {
    let field = build_field(&["S1", "C2a"]);
    let config = &field.config;
    let focus_names = vec!["S1".to_string(), "C2a".to_string()];
    let key = CacheKey::new(
        &config.dataset_name,
        config.search_radius_arcsec,
        &config.component_catalog_path,
        &config.fits_dir,
        &focus_names,
    );
    let cache = ResultCache::new(config.output_dir.as_deref(), "bitwise", false);
    let compute = || -> lofar_score::Result<GroundTruth> {
        let catalog = ComponentCatalog::load_csv(&config.component_catalog_path)?;
        let indexer = CatalogIndexer::build(
            &catalog,
            &focus_names,
            &config.fits_dir,
            config.search_radius_arcsec,
        )?;
        let projections = CoordinateProjector::new(true).project_all(&indexer);
        Ok(GroundTruth {
            indexer,
            projections,
        })
    };

    let (first, status) = cache.get_or_compute(&key, compute).unwrap();
    assert_eq!(status, CacheStatus::Computed);
    let (second, status) = cache.get_or_compute(&key, compute).unwrap();
    assert_eq!(status, CacheStatus::Loaded);

    for (a, b) in first.projections.iter().zip(&second.projections) {
        let (a, b) = (a.locations().unwrap(), b.locations().unwrap());
        let bits = |locs: &LocationArrays| -> Vec<u64> {
            locs.xs.iter().chain(locs.ys.iter()).map(|v| v.to_bits()).collect()
        };
        assert_eq!(bits(&a.component_locs), bits(&b.component_locs));
        assert_eq!(bits(&a.close_component_locs), bits(&b.close_component_locs));
        assert_eq!(a.focus_loc.x.to_bits(), b.focus_loc.x.to_bits());
    }

    // Projected focus of S1 lands on its component pixel, y flipped
    let s1 = first.projections[0].locations().unwrap();
    assert_relative_eq!(s1.focus_loc.x, 10.0, epsilon = 1e-6);
    assert_relative_eq!(s1.focus_loc.y, 10.0, epsilon = 1e-6);
    assert_eq!(first.indexer.entries()[0].close_components.len(), 3);
}

#[test]
fn test_misboxed_manifests_written() {
    let field = build_field(&["S1", "C2a"]);
    let mut evaluator = LofarEvaluator::new(field.config.clone())
        .unwrap()
        .with_misboxed_sink(Box::new(ManifestWriter::new(&field.dirs.output_dir)));
    evaluator.process(scenario_predictions());
    evaluator.evaluate().unwrap().unwrap();

    let read = |category: FailureCategory| -> MisboxedManifest {
        let path = field
            .dirs
            .output_dir
            .join(category.key())
            .join(MANIFEST_FILE_NAME);
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    };

    let multi = read(FailureCategory::AssocMulti);
    assert_eq!(multi.images.len(), 1);
    assert_eq!(multi.images[0].focus_name, "C2a");
    assert_eq!(multi.images[0].score, 0.8);

    let unassoc = read(FailureCategory::UnassocSingle);
    assert_eq!(unassoc.images.len(), 1);
    assert_eq!(unassoc.images[0].image_id, 0);

    assert!(read(FailureCategory::AssocSingle).images.is_empty());
}

#[test]
fn test_detailed_report() {
    let field = build_field(&["S1", "C2a"]);
    let mut evaluator = LofarEvaluator::new(field.config.clone())
        .unwrap()
        .detailed(true)
        .with_ground_truth_boxes(vec![
            GroundTruthBoxes {
                image_id: 0,
                boxes: vec![[0.0, 0.0, 20.0, 20.0], [9.0, 9.0, 11.0, 11.0]],
            },
            GroundTruthBoxes {
                image_id: 1,
                boxes: vec![[4.0, 4.0, 7.0, 7.0]],
            },
        ])
        .unwrap();
    evaluator.process(scenario_predictions());
    let output = evaluator.evaluate().unwrap().unwrap();
    let report = output.report.unwrap();

    assert_eq!(report.close_comp_histogram_single.get(&1), Some(&1));
    assert_eq!(report.close_comp_histogram_multi.get(&0), Some(&1));
    assert_eq!(report.recovered_fractions, vec![0.5]);

    // IoU 1 for S1, 2.25 / 9 for S2
    let iou = report.iou_stats.unwrap();
    assert_eq!(iou.count, 2);
    assert_relative_eq!(iou.mean, (1.0 + 0.25) / 2.0, epsilon = 1e-9);
}

#[test]
fn test_distributed_gather_matches_single_process() {
    let field = build_field(&["S1", "C2a"]);
    let config = ScoreConfig {
        output_dir: None,
        ..field.config.clone()
    };
    let mut shards = scenario_predictions();
    let rank1_shard = vec![shards.pop().unwrap()];
    let shards = [shards, rank1_shard];

    let handles: Vec<_> = LocalGroup::create(2)
        .into_iter()
        .zip(shards)
        .map(|(comm, shard)| {
            let config = config.clone();
            thread::spawn(move || {
                let mut evaluator = LofarEvaluator::new(config)
                    .unwrap()
                    .with_communicator(Box::new(comm));
                evaluator.process(shard);
                evaluator.evaluate().unwrap()
            })
        })
        .collect();
    let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(outputs[1].is_none());
    let gathered = outputs[0].as_ref().unwrap();

    let mut single = LofarEvaluator::new(config).unwrap();
    single.process(scenario_predictions());
    assert_eq!(gathered, &single.evaluate().unwrap().unwrap());
}
