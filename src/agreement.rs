//! Inter-rater agreement on the primary category.
//!
//! Expected agreement comes from the item's own category marginals
//! (`Σ p_c²` over every rater of the item). Each unordered rater pair gets a
//! chance-corrected coefficient `(o - e) / (1 - e)` where `o` is 1 when the
//! pair agrees and 0 otherwise; the multi-rater coefficient is the mean over
//! pairs. Complete agreement is defined as 1.0, which sidesteps the `0/0`
//! case where `e == 1`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::merge::AGREEMENT_EPSILON;
use crate::data::{Category, RawAnnotation};
use crate::types::{AnnotatorId, ItemId};

/// Agreement audit for one item. Not persisted with the corpus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgreementReport {
    /// Item the raters judged.
    pub item_id: ItemId,
    /// Raters in arrival order; indexes the matrix.
    pub annotator_ids: Vec<AnnotatorId>,
    /// Raw pairwise agreement (1.0 same category, 0.0 otherwise; diagonal 1.0).
    pub pairwise: Vec<Vec<f64>>,
    /// Fraction of unordered pairs with identical categories.
    pub observed: f64,
    /// Chance agreement from per-item marginals.
    pub expected: f64,
    /// Mean pairwise chance-corrected coefficient in `[-1, 1]`.
    pub coefficient: f64,
}

impl AgreementReport {
    /// True when every rater chose the same category.
    pub fn is_perfect(&self) -> bool {
        (self.observed - 1.0).abs() < AGREEMENT_EPSILON
    }

    /// Coefficient mapped into the `[0, 1]` range stored on canonical records.
    pub fn record_score(&self) -> f64 {
        self.coefficient.max(0.0)
    }
}

/// Chance-corrected agreement for one observed/expected pair.
pub fn chance_corrected(observed: f64, expected: f64) -> f64 {
    if (observed - 1.0).abs() < AGREEMENT_EPSILON {
        return 1.0;
    }
    let denominator = 1.0 - expected;
    if denominator.abs() < AGREEMENT_EPSILON {
        return 0.0;
    }
    ((observed - expected) / denominator).clamp(-1.0, 1.0)
}

/// Score one item's regular (non-adjudication) annotations.
///
/// Returns `None` when fewer than two raters are present; single-rater items
/// carry no agreement score.
pub fn score_item(annotations: &[RawAnnotation]) -> Option<AgreementReport> {
    let mut seen = HashSet::new();
    let raters: Vec<&RawAnnotation> = annotations
        .iter()
        .filter(|a| !a.adjudication && seen.insert(a.annotator_id.as_str()))
        .collect();
    score_raters(&raters)
}

/// Score exactly the given raters, adjudication or not.
pub(crate) fn score_raters(raters: &[&RawAnnotation]) -> Option<AgreementReport> {
    let n = raters.len();
    if n < 2 {
        return None;
    }

    let mut marginals: BTreeMap<Category, usize> = BTreeMap::new();
    for annotation in raters {
        *marginals.entry(annotation.primary_category).or_insert(0) += 1;
    }
    let expected: f64 = marginals
        .values()
        .map(|count| {
            let p = *count as f64 / n as f64;
            p * p
        })
        .sum();

    let mut pairwise = vec![vec![0.0; n]; n];
    let mut agreeing_pairs = 0usize;
    let mut pairs = 0usize;
    for i in 0..n {
        pairwise[i][i] = 1.0;
        for j in (i + 1)..n {
            let same = raters[i].primary_category == raters[j].primary_category;
            let value = if same { 1.0 } else { 0.0 };
            pairwise[i][j] = value;
            pairwise[j][i] = value;
            if same {
                agreeing_pairs += 1;
            }
            pairs += 1;
        }
    }

    let observed = agreeing_pairs as f64 / pairs as f64;
    // Every pair shares `expected`, so the mean of pairwise coefficients
    // reduces to the coefficient of the mean observed agreement.
    let coefficient = chance_corrected(observed, expected);

    Some(AgreementReport {
        item_id: raters[0].item_id.clone(),
        annotator_ids: raters.iter().map(|a| a.annotator_id.clone()).collect(),
        pairwise,
        observed,
        expected,
        coefficient,
    })
}

/// Corpus-level aggregate over per-item reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementSummary {
    /// Items with at least two raters.
    pub items_scored: usize,
    /// Mean coefficient over scored items.
    pub mean_coefficient: f64,
    /// Items where every rater agreed.
    pub perfect_agreement_items: usize,
    /// `perfect_agreement_items` over `items_scored`.
    pub perfect_agreement_rate: f64,
    /// Per-item reports ordered by `item_id`.
    pub per_item: Vec<AgreementReport>,
}

/// Aggregate per-item reports; ordering of `per_item` follows `item_id`.
pub fn summarize(mut reports: Vec<AgreementReport>) -> AgreementSummary {
    if reports.is_empty() {
        return AgreementSummary::default();
    }
    reports.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    let items_scored = reports.len();
    let mean_coefficient =
        reports.iter().map(|r| r.coefficient).sum::<f64>() / items_scored as f64;
    let perfect_agreement_items = reports.iter().filter(|r| r.is_perfect()).count();
    AgreementSummary {
        items_scored,
        mean_coefficient,
        perfect_agreement_items,
        perfect_agreement_rate: perfect_agreement_items as f64 / items_scored as f64,
        per_item: reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AnnotationFlags, LanguageTag, Severity};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn rating(item: &str, annotator: &str, category: Category) -> RawAnnotation {
        RawAnnotation {
            item_id: item.to_string(),
            annotator_id: annotator.to_string(),
            text: "sample".to_string(),
            url: None,
            primary_category: category,
            secondary_tags: BTreeSet::new(),
            severity: (!category.is_benign()).then_some(Severity::Medium),
            language_tag: LanguageTag::English,
            context: None,
            confidence: 0.9,
            flags: AnnotationFlags::default(),
            notes: None,
            adjudication: false,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn single_rater_is_not_scored() {
        assert!(score_item(&[rating("X0", "A", Category::Safe)]).is_none());
    }

    #[test]
    fn complete_agreement_is_exactly_one() {
        let report = score_item(&[
            rating("X1", "A", Category::HateSpeech),
            rating("X1", "B", Category::HateSpeech),
        ])
        .unwrap();
        assert_eq!(report.coefficient, 1.0);
        assert_eq!(report.observed, 1.0);
        assert_eq!(report.expected, 1.0);
        assert!(report.is_perfect());
        assert_eq!(report.pairwise, vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
    }

    #[test]
    fn two_raters_disagreeing_score_minus_one() {
        let report = score_item(&[
            rating("X3", "A", Category::Safe),
            rating("X3", "B", Category::Violence),
        ])
        .unwrap();
        assert!((report.expected - 0.5).abs() < 1e-12);
        assert!((report.coefficient + 1.0).abs() < 1e-12);
        assert_eq!(report.record_score(), 0.0);
    }

    #[test]
    fn three_raters_average_pairwise_coefficients() {
        let report = score_item(&[
            rating("X2", "A", Category::Phishing),
            rating("X2", "B", Category::Phishing),
            rating("X2", "C", Category::Safe),
        ])
        .unwrap();
        // e = (2/3)^2 + (1/3)^2 = 5/9; pairs: 1, -1.25, -1.25 → mean -0.5
        assert!((report.expected - 5.0 / 9.0).abs() < 1e-12);
        assert!((report.observed - 1.0 / 3.0).abs() < 1e-12);
        assert!((report.coefficient + 0.5).abs() < 1e-12);
        assert_eq!(report.pairwise[0][1], 1.0);
        assert_eq!(report.pairwise[1][2], 0.0);
        assert_eq!(report.annotator_ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn adjudication_ratings_are_ignored() {
        let mut tie_break = rating("X3", "C", Category::Safe);
        tie_break.adjudication = true;
        let report = score_item(&[
            rating("X3", "A", Category::Safe),
            rating("X3", "B", Category::Violence),
            tie_break,
        ])
        .unwrap();
        assert_eq!(report.annotator_ids.len(), 2);
    }

    #[test]
    fn repeat_ratings_do_not_inflate_agreement() {
        let report = score_item(&[
            rating("X4", "A", Category::Phishing),
            rating("X4", "A", Category::Phishing),
            rating("X4", "B", Category::Safe),
        ])
        .unwrap();
        assert_eq!(report.annotator_ids, vec!["A", "B"]);
        assert_eq!(report.observed, 0.0);
    }

    #[test]
    fn chance_corrected_handles_degenerate_expected() {
        assert_eq!(chance_corrected(1.0, 1.0), 1.0);
        assert_eq!(chance_corrected(0.5, 1.0), 0.0);
        assert!((chance_corrected(0.75, 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn summary_aggregates_items() {
        let perfect = score_item(&[
            rating("X1", "A", Category::Malware),
            rating("X1", "B", Category::Malware),
        ])
        .unwrap();
        let split = score_item(&[
            rating("X0", "A", Category::Safe),
            rating("X0", "B", Category::Violence),
        ])
        .unwrap();
        let summary = summarize(vec![perfect, split]);
        assert_eq!(summary.items_scored, 2);
        assert_eq!(summary.perfect_agreement_items, 1);
        assert!((summary.mean_coefficient - 0.0).abs() < 1e-12);
        assert_eq!(summary.per_item[0].item_id, "X0");
        assert_eq!(summarize(Vec::new()), AgreementSummary::default());
    }
}
