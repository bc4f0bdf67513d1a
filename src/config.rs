use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::balance::{
    DEFAULT_TOLERANCE, DEFAULT_UPSAMPLE_CAP, PROPORTION_SUM_EPSILON,
};
use crate::constants::dedup::DEFAULT_NEAR_DUPLICATE_THRESHOLD;
use crate::constants::splits::{DEFAULT_DRIFT_TOLERANCE, DEFAULT_SEED};
use crate::constants::validation::DEFAULT_SECONDARY_TAGS;
use crate::data::Category;
use crate::errors::CurationError;
use crate::splits::{SplitRatios, StratificationKey};
use crate::types::SecondaryTag;

/// Vocabulary checks applied by the validator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Allowed secondary tags; anything else is a schema violation.
    pub secondary_tags: BTreeSet<SecondaryTag>,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            secondary_tags: DEFAULT_SECONDARY_TAGS
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
        }
    }
}

/// Direction used when adopted raters split evenly on severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTieBreak {
    /// Precautionary: pick the more severe value.
    #[default]
    Higher,
    /// Permissive: pick the less severe value.
    Lower,
}

/// Consensus merge policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    /// Direction used when adopted raters split evenly on severity.
    pub severity_tie_break: SeverityTieBreak,
}

/// Duplicate detection settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Similarity in `(0, 1]` above which same-category records are near-duplicates.
    pub near_duplicate_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: DEFAULT_NEAR_DUPLICATE_THRESHOLD,
        }
    }
}

/// Target category distribution and resampling limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Category → target proportion. Empty disables balancing.
    pub target: BTreeMap<Category, f64>,
    /// Max upsampled count as a multiple of a category's natural count.
    pub upsample_cap: f64,
    /// Max absolute per-category deviation before the target is infeasible.
    pub tolerance: f64,
    /// Desired output size; defaults to the input size.
    pub target_total: Option<usize>,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            target: BTreeMap::new(),
            upsample_cap: DEFAULT_UPSAMPLE_CAP,
            tolerance: DEFAULT_TOLERANCE,
            target_total: None,
        }
    }
}

impl BalanceConfig {
    /// False when no target distribution is configured.
    pub fn is_enabled(&self) -> bool {
        !self.target.is_empty()
    }

    /// Check target proportions, cap, and tolerance.
    pub fn validate(&self) -> Result<(), CurationError> {
        if self.target.values().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(CurationError::Configuration(
                "target proportions must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = self.target.values().sum();
        if self.is_enabled() && (sum - 1.0).abs() > PROPORTION_SUM_EPSILON {
            return Err(CurationError::Configuration(format!(
                "target proportions must sum to 1.0, got {sum:.6}"
            )));
        }
        if !self.upsample_cap.is_finite() || self.upsample_cap < 1.0 {
            return Err(CurationError::Configuration(format!(
                "upsample cap must be >= 1.0, got {}",
                self.upsample_cap
            )));
        }
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(CurationError::Configuration(format!(
                "balance tolerance must be within [0, 1], got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Train/validation/test partitioning settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Train/validation/test proportions.
    pub ratios: SplitRatios,
    /// Keys whose Cartesian product defines strata.
    pub keys: Vec<StratificationKey>,
    /// Allowed gap between a stratum's share of a split and its overall share.
    pub drift_tolerance: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            ratios: SplitRatios::default(),
            keys: vec![StratificationKey::Category, StratificationKey::Language],
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
        }
    }
}

/// Top-level curation configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Seed that controls every deterministic ordering (balancing and splitting).
    pub seed: u64,
    /// Accepted secondary tags.
    pub vocabulary: VocabularyConfig,
    /// Consensus merge settings.
    pub merge: MergePolicy,
    /// Duplicate detection settings.
    pub dedup: DedupConfig,
    /// Category rebalancing settings.
    pub balance: BalanceConfig,
    /// Stratified split settings.
    pub split: SplitConfig,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            vocabulary: VocabularyConfig::default(),
            merge: MergePolicy::default(),
            dedup: DedupConfig::default(),
            balance: BalanceConfig::default(),
            split: SplitConfig::default(),
        }
    }
}

impl CurationConfig {
    /// Load a JSON config file; missing sections fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, CurationError> {
        let raw = fs::read_to_string(path)?;
        let config: CurationConfig = serde_json::from_str(&raw).map_err(|err| {
            CurationError::Configuration(format!("invalid config {}: {err}", path.display()))
        })?;
        Ok(config)
    }

    /// Reject settings that would make any stage ill-defined.
    pub fn validate(&self) -> Result<(), CurationError> {
        self.split.ratios.normalized()?;
        if self.split.keys.is_empty() {
            return Err(CurationError::Configuration(
                "at least one stratification key is required".to_string(),
            ));
        }
        let threshold = self.dedup.near_duplicate_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(CurationError::Configuration(format!(
                "near-duplicate threshold must be within (0, 1], got {threshold}"
            )));
        }
        if !(0.0..=1.0).contains(&self.split.drift_tolerance) {
            return Err(CurationError::Configuration(format!(
                "split drift tolerance must be within [0, 1], got {}",
                self.split.drift_tolerance
            )));
        }
        self.balance.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CurationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.seed, 42);
        assert!(!config.balance.is_enabled());
        assert!(config.vocabulary.secondary_tags.contains("doxxing"));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: CurationConfig = serde_json::from_str(
            r#"{"seed": 7, "balance": {"target": {"safe": 0.5, "violence": 0.5}}}"#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.balance.target.len(), 2);
        assert!((config.balance.upsample_cap - 1.5).abs() < 1e-12);
        assert_eq!(config.split.keys.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn target_proportions_must_sum_to_one() {
        let mut config = CurationConfig::default();
        config.balance.target.insert(Category::Safe, 0.6);
        config.balance.target.insert(Category::Violence, 0.6);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CurationError::Configuration(_)));
    }

    #[test]
    fn split_ratios_must_sum_to_one() {
        let mut config = CurationConfig::default();
        config.split.ratios = SplitRatios {
            train: 0.8,
            validation: 0.15,
            test: 0.15,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut config = CurationConfig::default();
        config.dedup.near_duplicate_threshold = 1.5;
        assert!(config.validate().is_err());
        config.dedup.near_duplicate_threshold = 0.0;
        assert!(config.validate().is_err());
    }
}
