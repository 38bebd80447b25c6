//! Per-image success rules and fail-fraction aggregation.
//!
//! Every projected image contributes to exactly one associated statistic and
//! one unassociated statistic, chosen by whether its source has one or more
//! components:
//!
//! | statistic | population | success |
//! |---|---|---|
//! | `assoc_single_fail_fraction` | `n == 1` | `comp_score == 1` |
//! | `assoc_multi_fail_fraction` | `n > 1` | `comp_score == n` |
//! | `unassoc_single_fail_fraction` | `n == 1` | `close_comp_score == 0` |
//! | `unassoc_multi_fail_fraction` | `n > 1` | `close_comp_score == 0` |
//!
//! A fail fraction is `1 - successes / total`, or NaN for an empty population.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::containment::ContainmentScores;
use crate::geometry::BoundingBox;
use crate::selector::ScoredPrediction;

/// The four failure statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Single-component source not covered
    AssocSingle,
    /// Multi-component source with missing components
    AssocMulti,
    /// Single-component box including unrelated components
    UnassocSingle,
    /// Multi-component box including unrelated components
    UnassocMulti,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 4] = [
        FailureCategory::AssocSingle,
        FailureCategory::AssocMulti,
        FailureCategory::UnassocSingle,
        FailureCategory::UnassocMulti,
    ];

    /// Result key, also used as the misboxed directory name
    pub fn key(&self) -> &'static str {
        match self {
            FailureCategory::AssocSingle => "assoc_single_fail_fraction",
            FailureCategory::AssocMulti => "assoc_multi_fail_fraction",
            FailureCategory::UnassocSingle => "unassoc_single_fail_fraction",
            FailureCategory::UnassocMulti => "unassoc_multi_fail_fraction",
        }
    }

    fn applies_to(&self, n_components: usize) -> bool {
        match self {
            FailureCategory::AssocSingle | FailureCategory::UnassocSingle => n_components == 1,
            FailureCategory::AssocMulti | FailureCategory::UnassocMulti => n_components > 1,
        }
    }

    fn succeeded(&self, n_components: usize, scores: &ContainmentScores) -> bool {
        match self {
            FailureCategory::AssocSingle => scores.comp_score == 1,
            FailureCategory::AssocMulti => scores.comp_score == n_components,
            FailureCategory::UnassocSingle | FailureCategory::UnassocMulti => {
                scores.close_comp_score == 0
            }
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Scoring outcome of one image that survived projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredImage {
    /// Position of the image in the prediction list
    pub index: usize,
    pub n_components: usize,
    pub selected: ScoredPrediction,
    pub scores: ContainmentScores,
    /// Smallest ground-truth box covering the focus pixel, when annotations are known
    #[serde(default)]
    pub central_gt_box: Option<BoundingBox>,
}

/// The four fail fractions; NaN marks an empty population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub assoc_single_fail_fraction: f64,
    pub assoc_multi_fail_fraction: f64,
    pub unassoc_single_fail_fraction: f64,
    pub unassoc_multi_fail_fraction: f64,
}

impl EvaluationResult {
    pub fn get(&self, category: FailureCategory) -> f64 {
        match category {
            FailureCategory::AssocSingle => self.assoc_single_fail_fraction,
            FailureCategory::AssocMulti => self.assoc_multi_fail_fraction,
            FailureCategory::UnassocSingle => self.unassoc_single_fail_fraction,
            FailureCategory::UnassocMulti => self.unassoc_multi_fail_fraction,
        }
    }

    fn set(&mut self, category: FailureCategory, value: f64) {
        match category {
            FailureCategory::AssocSingle => self.assoc_single_fail_fraction = value,
            FailureCategory::AssocMulti => self.assoc_multi_fail_fraction = value,
            FailureCategory::UnassocSingle => self.unassoc_single_fail_fraction = value,
            FailureCategory::UnassocMulti => self.unassoc_multi_fail_fraction = value,
        }
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        FailureCategory::ALL
            .iter()
            .map(|c| (c.key(), self.get(*c)))
            .collect()
    }
}

/// Failure and population counts of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryCount {
    pub failures: usize,
    pub total: usize,
}

/// Fail fractions plus the indices of the failing images
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub result: EvaluationResult,
    pub counts: BTreeMap<FailureCategory, CategoryCount>,
    /// Prediction-list indices of failures, ascending
    pub failing_indices: BTreeMap<FailureCategory, Vec<usize>>,
}

/// `1 - successes / total`; NaN when the population is empty.
pub fn fail_fraction(successes: usize, total: usize) -> f64 {
    if total == 0 {
        return f64::NAN;
    }
    1.0 - successes as f64 / total as f64
}

/// Apply the success rules to every scored image.
pub fn classify(images: &[ScoredImage]) -> Classification {
    let mut result = EvaluationResult {
        assoc_single_fail_fraction: f64::NAN,
        assoc_multi_fail_fraction: f64::NAN,
        unassoc_single_fail_fraction: f64::NAN,
        unassoc_multi_fail_fraction: f64::NAN,
    };
    let mut counts = BTreeMap::new();
    let mut failing_indices = BTreeMap::new();

    for category in FailureCategory::ALL {
        let population: Vec<&ScoredImage> = images
            .iter()
            .filter(|img| category.applies_to(img.n_components))
            .collect();
        let mut failing: Vec<usize> = population
            .iter()
            .filter(|img| !category.succeeded(img.n_components, &img.scores))
            .map(|img| img.index)
            .collect();
        failing.sort_unstable();

        let total = population.len();
        result.set(category, fail_fraction(total - failing.len(), total));
        counts.insert(
            category,
            CategoryCount {
                failures: failing.len(),
                total,
            },
        );
        failing_indices.insert(category, failing);
    }

    Classification {
        result,
        counts,
        failing_indices,
    }
}

/// Mean and population standard deviation of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

impl SampleStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            count: values.len(),
        })
    }
}

/// Diagnostics beyond the four fail fractions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedReport {
    pub counts: BTreeMap<FailureCategory, CategoryCount>,
    /// `close_comp_score` -> number of single-component images
    pub close_comp_histogram_single: BTreeMap<usize, usize>,
    /// `close_comp_score` -> number of multi-component images
    pub close_comp_histogram_multi: BTreeMap<usize, usize>,
    /// `comp_score / n` of multi-component images, in image order
    pub recovered_fractions: Vec<f64>,
    pub recovered_fraction_stats: Option<SampleStats>,
    /// IoU between the selected box and the central ground-truth box
    pub iou_stats: Option<SampleStats>,
}

impl DetailedReport {
    pub fn build(images: &[ScoredImage], classification: &Classification) -> Self {
        let mut close_comp_histogram_single = BTreeMap::new();
        let mut close_comp_histogram_multi = BTreeMap::new();
        let mut recovered_fractions = Vec::new();

        for img in images {
            let histogram = if img.n_components == 1 {
                &mut close_comp_histogram_single
            } else {
                &mut close_comp_histogram_multi
            };
            *histogram.entry(img.scores.close_comp_score).or_insert(0) += 1;

            if img.n_components > 1 {
                recovered_fractions.push(img.scores.comp_score as f64 / img.n_components as f64);
            }
        }

        let ious: Vec<f64> = images
            .iter()
            .filter_map(|img| {
                img.central_gt_box
                    .map(|gt_box| img.selected.bbox.iou(&gt_box))
            })
            .collect();

        Self {
            counts: classification.counts.clone(),
            close_comp_histogram_single,
            close_comp_histogram_multi,
            recovered_fraction_stats: SampleStats::from_values(&recovered_fractions),
            recovered_fractions,
            iou_stats: SampleStats::from_values(&ious),
        }
    }

    /// Write the human-readable summary to the log
    pub fn log_summary(&self) {
        for (category, count) in &self.counts {
            log::info!(
                "{}: {} of {} predictions fail ({:.1}%)",
                category,
                count.failures,
                count.total,
                fail_fraction(count.total - count.failures, count.total) * 100.0
            );
        }
        if let Some(stats) = &self.recovered_fraction_stats {
            log::info!(
                "Mean recovered component fraction for multi-component sources: {:.3} (std {:.3})",
                stats.mean,
                stats.std_dev
            );
        }
        if let Some(stats) = &self.iou_stats {
            log::info!(
                "Mean IoU of predicted box for central source is {:.2} with a std. dev. of {:.2}",
                stats.mean,
                stats.std_dev
            );
        }
    }
}
