//! Category rebalancing by keyed-hash downsampling and capped upsampling.
//!
//! The balancer never touches the canonical store: it reads a slice of
//! records and returns a derived multiset in which upsampled items appear
//! more than once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BalanceConfig;
use crate::constants::balance::DOWNSAMPLE_SEED_OFFSET;
use crate::data::{CanonicalRecord, Category, LanguageTag};
use crate::errors::{CategoryDeviation, CurationError};
use crate::hash::{stable_hash_indexed, stable_hash_str};

/// Requested vs produced counts for one target category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryBalance {
    /// Target category.
    pub category: Category,
    /// Records of the category before balancing.
    pub natural: usize,
    /// Count the target share asks for.
    pub desired: usize,
    /// Count actually produced.
    pub achieved: usize,
    /// Extra copies added by upsampling.
    pub upsampled_copies: usize,
    /// Natural records left out by downsampling.
    pub downsampled_away: usize,
    /// Target share.
    pub requested_share: f64,
    /// Produced share of the output.
    pub achieved_share: f64,
}

/// Audit of one balancing pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// Output size the target shares apply to.
    pub target_total: usize,
    /// Records actually produced.
    pub output_total: usize,
    /// One entry per target category, ordered by category.
    pub categories: Vec<CategoryBalance>,
    /// Categories absent from the target, with their natural counts.
    pub dropped_categories: Vec<(Category, usize)>,
}

/// Balanced multiset plus its report.
#[derive(Clone, Debug)]
pub struct BalancedSet {
    /// Balanced multiset; upsampled copies repeat their item id.
    pub records: Vec<CanonicalRecord>,
    /// Per-category audit.
    pub report: BalanceReport,
}

/// Resamples records toward a target category distribution.
#[derive(Clone, Debug)]
pub struct Balancer {
    config: BalanceConfig,
    seed: u64,
}

impl Balancer {
    /// Validate `config`; `seed` keys every selection.
    pub fn new(config: BalanceConfig, seed: u64) -> Result<Self, CurationError> {
        config.validate()?;
        if !config.is_enabled() {
            return Err(CurationError::Configuration(
                "balancer requires a non-empty target distribution".to_string(),
            ));
        }
        Ok(Self { config, seed })
    }

    /// Resample `records` toward the target distribution.
    ///
    /// Fails with [`CurationError::InfeasibleTarget`] when any category ends up
    /// further than the tolerance from its requested share.
    pub fn balance(&self, records: &[CanonicalRecord]) -> Result<BalancedSet, CurationError> {
        let target_total = self.config.target_total.unwrap_or(records.len());
        if records.is_empty() || target_total == 0 {
            debug!("[safety_corpus:balance] nothing to balance");
            return Ok(BalancedSet {
                records: Vec::new(),
                report: BalanceReport {
                    target_total,
                    ..BalanceReport::default()
                },
            });
        }

        let mut by_category: BTreeMap<Category, Vec<&CanonicalRecord>> = BTreeMap::new();
        for record in records {
            by_category
                .entry(record.primary_category)
                .or_default()
                .push(record);
        }

        let dropped_categories: Vec<(Category, usize)> = by_category
            .iter()
            .filter(|(category, _)| !self.config.target.contains_key(category))
            .map(|(category, group)| (*category, group.len()))
            .collect();
        for (category, count) in &dropped_categories {
            info!(
                "[safety_corpus:balance] dropping {} '{}' records absent from the target",
                count, category
            );
        }

        let mut output = Vec::new();
        let mut categories = Vec::with_capacity(self.config.target.len());
        for (category, share) in &self.config.target {
            let group = by_category.get(category).map(Vec::as_slice).unwrap_or(&[]);
            let natural = group.len();
            let desired = (share * target_total as f64).round() as usize;
            let (picked, upsampled_copies, downsampled_away) = if desired <= natural {
                (self.downsample(group, desired), 0, natural - desired)
            } else {
                let cap = (natural as f64 * self.config.upsample_cap).floor() as usize;
                let achieved = desired.min(cap);
                if achieved < desired {
                    debug!(
                        "[safety_corpus:balance] '{}' capped at {} of {} desired",
                        category, achieved, desired
                    );
                }
                (self.upsample(group, achieved), achieved - natural, 0)
            };
            categories.push(CategoryBalance {
                category: *category,
                natural,
                desired,
                achieved: picked.len(),
                upsampled_copies,
                downsampled_away,
                requested_share: *share,
                achieved_share: 0.0,
            });
            output.extend(picked);
        }

        let output_total = output.len();
        for entry in &mut categories {
            entry.achieved_share = if output_total == 0 {
                0.0
            } else {
                entry.achieved as f64 / output_total as f64
            };
        }

        let deviations: Vec<CategoryDeviation> = categories
            .iter()
            .map(|entry| CategoryDeviation {
                category: entry.category,
                requested: entry.requested_share,
                achieved: entry.achieved_share,
            })
            .collect();
        if deviations
            .iter()
            .any(|d| d.deviation() > self.config.tolerance)
        {
            warn!(
                "[safety_corpus:balance] target infeasible within tolerance {:.3}",
                self.config.tolerance
            );
            return Err(CurationError::InfeasibleTarget {
                deviations,
                achieved_counts: categories
                    .iter()
                    .map(|entry| (entry.category, entry.achieved))
                    .collect(),
            });
        }

        output.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        info!(
            "[safety_corpus:balance] balanced {} records into {} (target total {})",
            records.len(),
            output_total,
            target_total
        );
        Ok(BalancedSet {
            records: output,
            report: BalanceReport {
                target_total,
                output_total,
                categories,
                dropped_categories,
            },
        })
    }

    /// Keep `keep` records, spread over languages by natural share.
    fn downsample(&self, group: &[&CanonicalRecord], keep: usize) -> Vec<CanonicalRecord> {
        if keep == group.len() {
            return group.iter().map(|record| (*record).clone()).collect();
        }
        let mut by_language: BTreeMap<LanguageTag, Vec<&CanonicalRecord>> = BTreeMap::new();
        for record in group.iter().copied() {
            by_language
                .entry(record.language_tag)
                .or_default()
                .push(record);
        }

        let natural = group.len() as f64;
        let exact: Vec<f64> = by_language
            .values()
            .map(|members| keep as f64 * members.len() as f64 / natural)
            .collect();
        let mut quotas: Vec<usize> = exact.iter().map(|q| q.floor() as usize).collect();
        let mut order: Vec<usize> = (0..quotas.len()).collect();
        order.sort_by(|a, b| {
            let ra = exact[*a] - exact[*a].floor();
            let rb = exact[*b] - exact[*b].floor();
            rb.total_cmp(&ra)
        });
        let leftover = keep - quotas.iter().sum::<usize>();
        for idx in order.into_iter().take(leftover) {
            quotas[idx] += 1;
        }

        let seed = self.seed.wrapping_add(DOWNSAMPLE_SEED_OFFSET);
        by_language
            .into_values()
            .zip(quotas)
            .flat_map(|(mut members, quota)| {
                members.sort_by(|a, b| {
                    stable_hash_str(seed, &a.item_id)
                        .cmp(&stable_hash_str(seed, &b.item_id))
                        .then_with(|| a.item_id.cmp(&b.item_id))
                });
                members.truncate(quota);
                members.into_iter().cloned()
            })
            .collect()
    }

    /// Every natural record plus deterministic repeats up to `total`.
    fn upsample(&self, group: &[&CanonicalRecord], total: usize) -> Vec<CanonicalRecord> {
        let mut picked: Vec<CanonicalRecord> =
            group.iter().map(|record| (*record).clone()).collect();
        if group.is_empty() {
            return picked;
        }
        let mut round = 1u64;
        while picked.len() < total {
            let mut ordered: Vec<&CanonicalRecord> = group.to_vec();
            ordered.sort_by(|a, b| {
                stable_hash_indexed(self.seed, &a.item_id, round)
                    .cmp(&stable_hash_indexed(self.seed, &b.item_id, round))
                    .then_with(|| a.item_id.cmp(&b.item_id))
            });
            let needed = total - picked.len();
            picked.extend(ordered.into_iter().take(needed).cloned());
            round += 1;
        }
        picked
    }
}
