use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{
    CanonicalRecord, Category, ContentContext, LanguageTag, ResolutionMethod, Severity,
};
use crate::splits::{SplitCorpus, SplitLabel};

/// Count and share of one value within a record set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Share<K> {
    /// Counted value.
    pub key: K,
    /// Records carrying `key`.
    pub count: usize,
    /// `count` over the number of records that carry any value.
    pub share: f64,
}

/// Count values and express them as shares of the total.
///
/// Ordered by descending count, then by key.
pub fn distribution<K: Ord + Clone>(values: impl IntoIterator<Item = K>) -> Vec<Share<K>> {
    let mut counts: BTreeMap<K, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let total: usize = counts.values().sum();
    let mut shares: Vec<Share<K>> = counts
        .into_iter()
        .map(|(key, count)| Share {
            key,
            count,
            share: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            },
        })
        .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    shares
}

/// Distribution and quality metrics of one record set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    /// Records in the set, upsampled copies included.
    pub total: usize,
    /// Primary category distribution.
    pub categories: Vec<Share<Category>>,
    /// Language tag distribution.
    pub languages: Vec<Share<LanguageTag>>,
    /// Severity distribution over records that carry one.
    pub severities: Vec<Share<Severity>>,
    /// Records without a severity (benign records may omit it).
    pub severity_unset: usize,
    /// Content context distribution over records that carry one.
    pub contexts: Vec<Share<ContentContext>>,
    /// Records without a content context.
    pub context_unset: usize,
    /// Largest over smallest category count; 0 when empty.
    pub category_imbalance_ratio: f64,
    /// Mean over records that carry an agreement score; 0 when none do.
    pub mean_agreement: f64,
    /// Records that carry an agreement score.
    pub scored_records: usize,
    /// How records were resolved by the merger.
    pub resolution_methods: Vec<Share<ResolutionMethod>>,
    /// Exact plus near-duplicate clusters found before balancing.
    pub duplicate_cluster_count: usize,
    /// Records flagged as containing identifying information.
    pub identifying_info_count: usize,
    /// Records flagged with ambiguous tone.
    pub ambiguous_tone_count: usize,
    /// Records flagged as needing more context.
    pub requires_context_count: usize,
    /// Mean annotator confidence; 0 when empty.
    pub mean_confidence: f64,
}

/// Aggregate `records`. An empty slice yields an all-zero report.
pub fn corpus_stats(records: &[CanonicalRecord], duplicate_cluster_count: usize) -> CorpusStats {
    if records.is_empty() {
        return CorpusStats {
            duplicate_cluster_count,
            ..CorpusStats::default()
        };
    }
    let categories = distribution(records.iter().map(|r| r.primary_category));
    let category_imbalance_ratio = match (categories.first(), categories.last()) {
        (Some(max), Some(min)) if min.count > 0 => max.count as f64 / min.count as f64,
        _ => 0.0,
    };
    let scores: Vec<f64> = records.iter().filter_map(|r| r.agreement_score).collect();
    let mean_agreement = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    CorpusStats {
        total: records.len(),
        categories,
        languages: distribution(records.iter().map(|r| r.language_tag)),
        severities: distribution(records.iter().filter_map(|r| r.severity)),
        severity_unset: records.iter().filter(|r| r.severity.is_none()).count(),
        contexts: distribution(records.iter().filter_map(|r| r.context)),
        context_unset: records.iter().filter(|r| r.context.is_none()).count(),
        category_imbalance_ratio,
        mean_agreement,
        scored_records: scores.len(),
        resolution_methods: distribution(records.iter().map(|r| r.resolution_method)),
        duplicate_cluster_count,
        identifying_info_count: records
            .iter()
            .filter(|r| r.flags.contains_identifying_info)
            .count(),
        ambiguous_tone_count: records.iter().filter(|r| r.flags.is_ambiguous_tone).count(),
        requires_context_count: records
            .iter()
            .filter(|r| r.flags.requires_additional_context)
            .count(),
        mean_confidence: records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64,
    }
}

/// Whole-corpus stats plus one block per split.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitStats {
    /// All splits together.
    pub overall: CorpusStats,
    /// One entry per split label.
    pub per_split: BTreeMap<SplitLabel, CorpusStats>,
}

/// Stats for the union of all splits and for each split on its own.
pub fn split_stats(split: &SplitCorpus, duplicate_cluster_count: usize) -> SplitStats {
    let all: Vec<CanonicalRecord> = [&split.train, &split.validation, &split.test]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let per_split = crate::constants::splits::ALL_SPLITS
        .iter()
        .map(|label| (*label, corpus_stats(split.records(*label), 0)))
        .collect();
    SplitStats {
        overall: corpus_stats(&all, duplicate_cluster_count),
        per_split,
    }
}

fn write_shares<K: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    shares: &[Share<K>],
) -> fmt::Result {
    writeln!(f, "{title}:")?;
    if shares.is_empty() {
        return writeln!(f, "  (none)");
    }
    for share in shares {
        writeln!(
            f,
            "  {:<16} {:>7} ({:>5.1}%)",
            share.key.to_string(),
            share.count,
            share.share * 100.0
        )?;
    }
    Ok(())
}

impl fmt::Display for CorpusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records: {}", self.total)?;
        write_shares(f, "categories", &self.categories)?;
        write_shares(f, "languages", &self.languages)?;
        write_shares(f, "severity", &self.severities)?;
        writeln!(f, "  {:<16} {:>7}", "unset", self.severity_unset)?;
        write_shares(f, "context", &self.contexts)?;
        writeln!(f, "  {:<16} {:>7}", "unset", self.context_unset)?;
        write_shares(f, "resolution", &self.resolution_methods)?;
        writeln!(
            f,
            "mean agreement: {:.3} over {} multi-rated records",
            self.mean_agreement, self.scored_records
        )?;
        writeln!(f, "mean confidence: {:.3}", self.mean_confidence)?;
        writeln!(f, "category imbalance: {:.2}x", self.category_imbalance_ratio)?;
        writeln!(f, "duplicate clusters: {}", self.duplicate_cluster_count)?;
        writeln!(
            f,
            "flags: identifying_info={} ambiguous_tone={} requires_context={}",
            self.identifying_info_count, self.ambiguous_tone_count, self.requires_context_count
        )
    }
}

impl fmt::Display for SplitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== overall ==")?;
        write!(f, "{}", self.overall)?;
        for (label, stats) in &self.per_split {
            writeln!(f, "== {label} ==")?;
            write!(f, "{stats}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergePolicy;
    use crate::data::{AnnotationFlags, RawAnnotation};
    use crate::merge::merge_item;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn rating(item: &str, annotator: &str, category: Category, confidence: f64) -> RawAnnotation {
        RawAnnotation {
            item_id: item.to_string(),
            annotator_id: annotator.to_string(),
            text: item.to_string(),
            url: None,
            primary_category: category,
            secondary_tags: BTreeSet::new(),
            severity: (!category.is_benign()).then_some(Severity::High),
            language_tag: LanguageTag::EnglishTelugu,
            context: None,
            confidence,
            flags: AnnotationFlags {
                is_ambiguous_tone: category == Category::Cyberbullying,
                ..AnnotationFlags::default()
            },
            notes: None,
            adjudication: false,
            created_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn merged(ratings: &[RawAnnotation]) -> CanonicalRecord {
        merge_item(ratings, MergePolicy::default())
            .unwrap()
            .into_canonical()
            .unwrap()
    }

    #[test]
    fn empty_input_reports_zeroes() {
        let stats = corpus_stats(&[], 0);
        assert_eq!(stats, CorpusStats::default());
        assert_eq!(stats.mean_agreement, 0.0);
        assert!(stats.to_string().contains("records: 0"));
    }

    #[test]
    fn stats_cover_distribution_and_quality() {
        let mut chat = rating("c", "A1", Category::Cyberbullying, 0.5);
        chat.context = Some(ContentContext::Chat);
        let mut email = rating("b", "A1", Category::Safe, 1.0);
        email.context = Some(ContentContext::Email);
        let records = vec![
            merged(&[
                rating("a", "A1", Category::Safe, 0.8),
                rating("a", "A2", Category::Safe, 0.6),
            ]),
            merged(&[email]),
            merged(&[chat]),
        ];
        let stats = corpus_stats(&records, 2);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.categories[0].key, Category::Safe);
        assert_eq!(stats.categories[0].count, 2);
        assert!((stats.categories[0].share - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.category_imbalance_ratio, 2.0);
        assert_eq!(stats.severity_unset, 2);
        assert_eq!(stats.severities[0].key, Severity::High);
        let contexts: Vec<(ContentContext, usize)> =
            stats.contexts.iter().map(|s| (s.key, s.count)).collect();
        assert_eq!(
            contexts,
            vec![(ContentContext::Email, 1), (ContentContext::Chat, 1)]
        );
        assert_eq!(stats.context_unset, 1);
        let report = stats.to_string();
        assert!(report.contains("context:"));
        assert!(report.contains("chat"));
        assert_eq!(stats.scored_records, 1);
        assert_eq!(stats.mean_agreement, 1.0);
        assert_eq!(stats.duplicate_cluster_count, 2);
        assert_eq!(stats.ambiguous_tone_count, 1);
        assert!((stats.mean_confidence - 2.2 / 3.0).abs() < 1e-9);
        let methods: Vec<ResolutionMethod> =
            stats.resolution_methods.iter().map(|s| s.key).collect();
        assert_eq!(
            methods,
            vec![ResolutionMethod::SingleRater, ResolutionMethod::Unanimous]
        );
    }

    #[test]
    fn distribution_orders_by_count_then_key() {
        let shares = distribution(["b", "a", "b", "c", "a"]);
        let keys: Vec<&str> = shares.iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!((shares[2].share - 0.2).abs() < 1e-9);
    }
}
