use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SplitConfig;
use crate::constants::splits::{
    ALL_SPLITS, DEFAULT_TEST_RATIO, DEFAULT_TRAIN_RATIO, DEFAULT_VALIDATION_RATIO,
    RATIO_SUM_EPSILON, SPLIT_SEED_OFFSET,
};
use crate::data::CanonicalRecord;
use crate::errors::CurationError;
use crate::hash::stable_hash_str;
use crate::types::{ItemId, StratumKey};

/// Logical dataset partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitLabel {
    /// Training split.
    Train,
    /// Validation split.
    Validation,
    /// Test split.
    Test,
}

impl SplitLabel {
    /// Lowercase name used in file names and reports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SplitLabel::Train => "train",
            SplitLabel::Validation => "validation",
            SplitLabel::Test => "test",
        }
    }

    const fn index(self) -> usize {
        match self {
            SplitLabel::Train => 0,
            SplitLabel::Validation => 1,
            SplitLabel::Test => 2,
        }
    }
}

impl fmt::Display for SplitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ratio configuration for train/validation/test assignment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    /// Fraction assigned to train.
    pub train: f64,
    /// Fraction assigned to validation.
    pub validation: f64,
    /// Fraction assigned to test.
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: DEFAULT_TRAIN_RATIO,
            validation: DEFAULT_VALIDATION_RATIO,
            test: DEFAULT_TEST_RATIO,
        }
    }
}

impl SplitRatios {
    /// Validate that ratios are non-negative and sum to `1.0` (within epsilon).
    pub fn normalized(self) -> Result<Self, CurationError> {
        if [self.train, self.validation, self.test]
            .iter()
            .any(|r| !r.is_finite() || *r < 0.0)
        {
            return Err(CurationError::Configuration(
                "split ratios must be finite and non-negative".to_string(),
            ));
        }
        let sum = self.train + self.validation + self.test;
        if (sum - 1.0).abs() > RATIO_SUM_EPSILON {
            return Err(CurationError::Configuration(format!(
                "split ratios must sum to 1.0, got {sum:.6}"
            )));
        }
        Ok(self)
    }

    /// Ratio assigned to `label`.
    pub fn ratio_for(&self, label: SplitLabel) -> f64 {
        match label {
            SplitLabel::Train => self.train,
            SplitLabel::Validation => self.validation,
            SplitLabel::Test => self.test,
        }
    }

    fn active_splits(&self) -> usize {
        ALL_SPLITS
            .iter()
            .filter(|label| self.ratio_for(**label) > 0.0)
            .count()
    }
}

/// Record attribute used to build strata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StratificationKey {
    /// Primary category.
    Category,
    /// Language tag.
    Language,
    /// Severity, `none` when unset.
    Severity,
    /// Content context, `none` when unset.
    Context,
}

impl StratificationKey {
    /// Value of this key for `record`; absent optional fields map to `"none"`.
    pub fn value_of(&self, record: &CanonicalRecord) -> String {
        match self {
            StratificationKey::Category => record.primary_category.as_str().to_string(),
            StratificationKey::Language => record.language_tag.as_str().to_string(),
            StratificationKey::Severity => record
                .severity
                .map_or("none", |severity| severity.as_str())
                .to_string(),
            StratificationKey::Context => record
                .context
                .map_or("none", |context| context.as_str())
                .to_string(),
        }
    }
}

impl FromStr for StratificationKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "category" | "primary_category" => Ok(StratificationKey::Category),
            "language" | "language_tag" => Ok(StratificationKey::Language),
            "severity" => Ok(StratificationKey::Severity),
            "context" => Ok(StratificationKey::Context),
            other => Err(format!("unknown stratification key '{other}'")),
        }
    }
}

/// Per-stratum allocation, counted in distinct items and in records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumAllocation {
    /// Key values identifying the stratum.
    pub stratum: StratumKey,
    /// Distinct items in the stratum.
    pub items: usize,
    /// Records in the stratum, upsampled copies included.
    pub records: usize,
    /// Items per split, in `train, validation, test` order.
    pub item_counts: [usize; 3],
    /// Records (including upsampled copies) per split.
    pub record_counts: [usize; 3],
    /// True when the stratum was too small to spread.
    pub forced_to_train: bool,
}

/// A stratum whose share of a split strays from its overall share.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumDrift {
    /// Stratum measured.
    pub stratum: StratumKey,
    /// Split measured.
    pub split: SplitLabel,
    /// Stratum's share of the split's records.
    pub split_share: f64,
    /// Stratum's share of all records.
    pub overall_share: f64,
}

impl StratumDrift {
    /// Absolute gap between the two shares.
    pub fn drift(&self) -> f64 {
        (self.split_share - self.overall_share).abs()
    }
}

/// Audit trail of one split run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitReport {
    /// Seed the split was derived from.
    pub seed: u64,
    /// Normalized ratios used.
    pub ratios: SplitRatios,
    /// Stratification keys used.
    pub keys: Vec<StratificationKey>,
    /// Allocation per stratum, ordered by key.
    pub strata: Vec<StratumAllocation>,
    /// Strata too small to represent every active split.
    pub forced_to_train: Vec<StratumKey>,
    /// Allowed drift before a stratum is reported.
    pub drift_tolerance: f64,
    /// Largest stratum drift over every non-empty split.
    pub max_drift: f64,
    /// Entries whose drift exceeds the tolerance.
    pub drift_violations: Vec<StratumDrift>,
}

/// The three partitions plus the split report.
#[derive(Clone, Debug)]
pub struct SplitCorpus {
    /// Training records.
    pub train: Vec<CanonicalRecord>,
    /// Validation records.
    pub validation: Vec<CanonicalRecord>,
    /// Test records.
    pub test: Vec<CanonicalRecord>,
    /// Allocation and drift audit.
    pub report: SplitReport,
}

impl SplitCorpus {
    /// Records of one split.
    pub fn records(&self, label: SplitLabel) -> &[CanonicalRecord] {
        match label {
            SplitLabel::Train => &self.train,
            SplitLabel::Validation => &self.validation,
            SplitLabel::Test => &self.test,
        }
    }

    /// Records across all splits.
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    /// True when every split is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records_mut(&mut self, label: SplitLabel) -> &mut Vec<CanonicalRecord> {
        match label {
            SplitLabel::Train => &mut self.train,
            SplitLabel::Validation => &mut self.validation,
            SplitLabel::Test => &mut self.test,
        }
    }
}

/// Deterministic multi-key stratified splitter.
///
/// Strata are the Cartesian product of the configured key values. Within a
/// stratum, distinct items are ordered by a keyed hash of `(seed, item_id)`
/// and cut into contiguous runs sized by largest-remainder allocation, so the
/// same seed and input always yield the same assignment. Every copy of an
/// upsampled item lands in the same split.
#[derive(Clone, Debug)]
pub struct StratifiedSplitter {
    config: SplitConfig,
    seed: u64,
}

impl StratifiedSplitter {
    /// Validate `config`; `seed` keys the order within each stratum.
    pub fn new(config: SplitConfig, seed: u64) -> Result<Self, CurationError> {
        config.ratios.normalized()?;
        if config.keys.is_empty() {
            return Err(CurationError::Configuration(
                "at least one stratification key is required".to_string(),
            ));
        }
        Ok(Self { config, seed })
    }

    fn stratum_of(&self, record: &CanonicalRecord) -> StratumKey {
        self.config
            .keys
            .iter()
            .map(|key| key.value_of(record))
            .collect()
    }

    /// Partition `records` into train/validation/test, assigning each record once.
    pub fn split(&self, records: Vec<CanonicalRecord>) -> Result<SplitCorpus, CurationError> {
        let total_records = records.len();
        let mut strata: BTreeMap<StratumKey, IndexMap<ItemId, Vec<CanonicalRecord>>> =
            BTreeMap::new();
        for record in records {
            strata
                .entry(self.stratum_of(&record))
                .or_default()
                .entry(record.item_id.clone())
                .or_default()
                .push(record);
        }

        let ratios = self.config.ratios;
        let order_seed = self.seed.wrapping_add(SPLIT_SEED_OFFSET);
        let mut corpus = SplitCorpus {
            train: Vec::new(),
            validation: Vec::new(),
            test: Vec::new(),
            report: SplitReport {
                seed: self.seed,
                ratios,
                keys: self.config.keys.clone(),
                strata: Vec::new(),
                forced_to_train: Vec::new(),
                drift_tolerance: self.config.drift_tolerance,
                max_drift: 0.0,
                drift_violations: Vec::new(),
            },
        };

        for (stratum, items) in strata {
            let mut items: Vec<(ItemId, Vec<CanonicalRecord>)> = items.into_iter().collect();
            items.sort_by(|a, b| {
                stable_hash_str(order_seed, &a.0)
                    .cmp(&stable_hash_str(order_seed, &b.0))
                    .then_with(|| a.0.cmp(&b.0))
            });

            let item_counts = allocate(items.len(), ratios);
            let forced_to_train = item_counts.is_none();
            let item_counts = item_counts.unwrap_or([items.len(), 0, 0]);
            if forced_to_train {
                warn!(
                    "[safety_corpus:split] stratum {:?} has {} items, fewer than the {} active splits; forcing to train",
                    stratum,
                    items.len(),
                    ratios.active_splits()
                );
                corpus.report.forced_to_train.push(stratum.clone());
            }

            let mut record_counts = [0usize; 3];
            let mut remaining = items.into_iter();
            let mut records_in_stratum = 0;
            for label in ALL_SPLITS {
                for (_, copies) in remaining.by_ref().take(item_counts[label.index()]) {
                    for mut record in copies {
                        record.assign_split(label)?;
                        record_counts[label.index()] += 1;
                        records_in_stratum += 1;
                        corpus.records_mut(label).push(record);
                    }
                }
            }

            corpus.report.strata.push(StratumAllocation {
                stratum,
                items: item_counts.iter().sum(),
                records: records_in_stratum,
                item_counts,
                record_counts,
                forced_to_train,
            });
        }

        for label in ALL_SPLITS {
            corpus
                .records_mut(label)
                .sort_by(|a, b| a.item_id.cmp(&b.item_id));
        }
        self.check_drift(&mut corpus, total_records);
        debug!(
            "[safety_corpus:split] assigned {} records: train={} validation={} test={}",
            corpus.len(),
            corpus.train.len(),
            corpus.validation.len(),
            corpus.test.len()
        );
        Ok(corpus)
    }

    fn check_drift(&self, corpus: &mut SplitCorpus, total_records: usize) {
        if total_records == 0 {
            return;
        }
        let split_totals = ALL_SPLITS.map(|label| corpus.records(label).len());
        let mut max_drift: f64 = 0.0;
        let mut violations = Vec::new();
        for allocation in &corpus.report.strata {
            let overall_share = allocation.records as f64 / total_records as f64;
            for label in ALL_SPLITS {
                let split_total = split_totals[label.index()];
                if split_total == 0 {
                    continue;
                }
                let entry = StratumDrift {
                    stratum: allocation.stratum.clone(),
                    split: label,
                    split_share: allocation.record_counts[label.index()] as f64
                        / split_total as f64,
                    overall_share,
                };
                max_drift = max_drift.max(entry.drift());
                if entry.drift() > self.config.drift_tolerance {
                    violations.push(entry);
                }
            }
        }
        if !violations.is_empty() {
            warn!(
                "[safety_corpus:split] {} stratum/split pairs drift beyond {:.3} (max {:.3})",
                violations.len(),
                self.config.drift_tolerance,
                max_drift
            );
        }
        corpus.report.max_drift = max_drift;
        corpus.report.drift_violations = violations;
    }
}

/// Largest-remainder allocation of `n` items over the three splits.
///
/// Returns `None` when the stratum is too small to give every active split a
/// member and more than one split is active. Otherwise train gets at least one.
fn allocate(n: usize, ratios: SplitRatios) -> Option<[usize; 3]> {
    if n == 0 {
        return Some([0, 0, 0]);
    }
    let active = ratios.active_splits();
    if active > 1 && n < active {
        return None;
    }

    let exact = ALL_SPLITS.map(|label| ratios.ratio_for(label) * n as f64);
    let mut counts = exact.map(|share| share.floor() as usize);
    let assigned: usize = counts.iter().sum();
    let mut by_remainder: Vec<usize> = (0..3).collect();
    // Stable sort keeps split order among equal remainders.
    by_remainder.sort_by(|a, b| {
        let ra = exact[*a] - exact[*a].floor();
        let rb = exact[*b] - exact[*b].floor();
        rb.total_cmp(&ra)
    });
    for idx in by_remainder.into_iter().take(n.saturating_sub(assigned)) {
        counts[idx] += 1;
    }

    if counts[0] == 0 {
        let donor = if counts[2] > counts[1] { 2 } else { 1 };
        counts[donor] -= 1;
        counts[0] += 1;
    }
    Some(counts)
}
