//! Exact and near-duplicate detection over canonical records.
//!
//! Exact duplicates (same normalized content and language) are collapsed into
//! the earliest record. Near-duplicates (same category, similarity above the
//! threshold) are only reported: paraphrase variants are kept on purpose.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DedupConfig;
use crate::data::{CanonicalRecord, Category, LanguageTag};
use crate::types::{ItemId, NormalizedText};
use crate::utils::normalize_text;

/// Records collapsed into one survivor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExactCluster {
    /// Record kept.
    pub survivor: ItemId,
    /// Records dropped as exact copies.
    pub removed: Vec<ItemId>,
    /// Normalized content shared by the cluster.
    pub normalized_text: NormalizedText,
    /// Language shared by the cluster.
    pub language_tag: LanguageTag,
}

/// Similarity between two records of one near-duplicate cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearDuplicatePair {
    /// First item of the pair.
    pub left: ItemId,
    /// Second item of the pair.
    pub right: ItemId,
    /// Normalized Levenshtein similarity.
    pub similarity: f64,
}

/// Connected group of near-duplicates for human review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearDuplicateCluster {
    /// Category shared by the cluster.
    pub category: Category,
    /// Members ordered by item id.
    pub item_ids: Vec<ItemId>,
    /// Pairs above the threshold.
    pub pairs: Vec<NearDuplicatePair>,
}

/// Duplicate-cluster report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupReport {
    /// Threshold the near-duplicate search used.
    pub threshold: f64,
    /// Records before deduplication.
    pub input_records: usize,
    /// Exact copies removed.
    pub removed_records: usize,
    /// Exact-duplicate clusters.
    pub exact_clusters: Vec<ExactCluster>,
    /// Near-duplicate clusters, flagged but kept.
    pub near_duplicate_clusters: Vec<NearDuplicateCluster>,
}

impl DedupReport {
    /// Exact plus near-duplicate clusters.
    pub fn cluster_count(&self) -> usize {
        self.exact_clusters.len() + self.near_duplicate_clusters.len()
    }
}

/// Surviving records plus the report.
#[derive(Clone, Debug)]
pub struct DedupOutcome {
    /// Records left after removing exact copies.
    pub records: Vec<CanonicalRecord>,
    /// What was removed or flagged.
    pub report: DedupReport,
}

/// Normalized Levenshtein similarity of the normalized forms of `a` and `b`.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_text(a), &normalize_text(b))
}

/// Exact and near-duplicate detector.
#[derive(Clone, Copy, Debug)]
pub struct Deduplicator {
    threshold: f64,
}

impl Deduplicator {
    /// Detector with the given threshold.
    pub fn new(config: DedupConfig) -> Self {
        Self {
            threshold: config.near_duplicate_threshold,
        }
    }

    /// Remove exact duplicates and report near-duplicate clusters among survivors.
    pub fn deduplicate(&self, records: &[CanonicalRecord]) -> DedupOutcome {
        let mut groups: IndexMap<(NormalizedText, LanguageTag), Vec<&CanonicalRecord>> =
            IndexMap::new();
        for record in records {
            groups
                .entry((normalize_text(record.content()), record.language_tag))
                .or_default()
                .push(record);
        }

        let mut survivors = Vec::with_capacity(groups.len());
        let mut exact_clusters = Vec::new();
        for ((normalized_text, language_tag), members) in groups {
            let (survivor, cluster) = collapse(members, normalized_text, language_tag);
            survivors.push(survivor);
            exact_clusters.extend(cluster);
        }

        let removed_records = records.len() - survivors.len();
        let near_duplicate_clusters = self.near_duplicates(&survivors);
        debug!(
            "[safety_corpus:dedup] removed {} exact duplicates in {} clusters; {} near-duplicate clusters flagged",
            removed_records,
            exact_clusters.len(),
            near_duplicate_clusters.len()
        );

        DedupOutcome {
            records: survivors,
            report: DedupReport {
                threshold: self.threshold,
                input_records: records.len(),
                removed_records,
                exact_clusters,
                near_duplicate_clusters,
            },
        }
    }

    /// Clusters of same-category records whose similarity exceeds the threshold.
    pub fn near_duplicates(&self, records: &[CanonicalRecord]) -> Vec<NearDuplicateCluster> {
        let mut by_category: BTreeMap<Category, Vec<(&ItemId, NormalizedText)>> = BTreeMap::new();
        for record in records {
            by_category
                .entry(record.primary_category)
                .or_default()
                .push((&record.item_id, normalize_text(record.content())));
        }

        let mut clusters = Vec::new();
        for (category, mut members) in by_category {
            members.sort_by(|a, b| a.0.cmp(b.0));
            clusters.extend(self.cluster_members(category, &members));
        }
        clusters
    }

    fn cluster_members(
        &self,
        category: Category,
        members: &[(&ItemId, NormalizedText)],
    ) -> Vec<NearDuplicateCluster> {
        let lengths: Vec<usize> = members.iter().map(|(_, text)| text.chars().count()).collect();
        let threshold = self.threshold;
        let n = members.len();
        let pairs: Vec<(usize, usize, f64)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let lengths = &lengths;
                ((i + 1)..n).filter_map(move |j| {
                    let (short, long) = if lengths[i] <= lengths[j] {
                        (lengths[i], lengths[j])
                    } else {
                        (lengths[j], lengths[i])
                    };
                    // Levenshtein distance is at least the length gap.
                    if long > 0 && (short as f64 / long as f64) <= threshold {
                        return None;
                    }
                    let score = strsim::normalized_levenshtein(&members[i].1, &members[j].1);
                    (score > threshold).then_some((i, j, score))
                })
            })
            .collect();

        if pairs.is_empty() {
            return Vec::new();
        }
        let mut sets = DisjointSet::new(n);
        for (i, j, _) in &pairs {
            sets.union(*i, *j);
        }
        let mut grouped: BTreeMap<usize, NearDuplicateCluster> = BTreeMap::new();
        for (i, j, score) in pairs {
            let root = sets.find(i);
            let cluster = grouped.entry(root).or_insert_with(|| NearDuplicateCluster {
                category,
                item_ids: Vec::new(),
                pairs: Vec::new(),
            });
            cluster.pairs.push(NearDuplicatePair {
                left: members[i].0.clone(),
                right: members[j].0.clone(),
                similarity: score,
            });
        }
        let mut clusters: Vec<NearDuplicateCluster> = grouped.into_values().collect();
        for cluster in &mut clusters {
            let mut ids: Vec<ItemId> = cluster
                .pairs
                .iter()
                .flat_map(|pair| [pair.left.clone(), pair.right.clone()])
                .collect();
            ids.sort();
            ids.dedup();
            cluster.item_ids = ids;
            cluster.pairs.sort_by(|a, b| {
                a.left.cmp(&b.left).then_with(|| a.right.cmp(&b.right))
            });
        }
        clusters.sort_by(|a, b| a.item_ids.cmp(&b.item_ids));
        clusters
    }
}

/// Keep the earliest member; fold the others' raters into it for audit.
fn collapse(
    mut members: Vec<&CanonicalRecord>,
    normalized_text: NormalizedText,
    language_tag: LanguageTag,
) -> (CanonicalRecord, Option<ExactCluster>) {
    members.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    let mut survivor = members[0].clone();
    if members.len() == 1 {
        return (survivor, None);
    }
    let mut seen: HashSet<String> = survivor.contributing_annotator_ids.iter().cloned().collect();
    for duplicate in &members[1..] {
        for annotator in &duplicate.contributing_annotator_ids {
            if seen.insert(annotator.clone()) {
                survivor.contributing_annotator_ids.push(annotator.clone());
            }
        }
    }
    let cluster = ExactCluster {
        survivor: survivor.item_id.clone(),
        removed: members[1..].iter().map(|r| r.item_id.clone()).collect(),
        normalized_text,
        language_tag,
    };
    (survivor, Some(cluster))
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}
