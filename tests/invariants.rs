use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, TimeZone, Utc};

use safety_corpus::agreement::score_item;
use safety_corpus::merge::{MergeOutcome, group_by_item, merge_item, merge_items};
use safety_corpus::{
    AnnotationFlags, BalanceConfig, Balancer, CanonicalCorpus, CanonicalRecord, Category,
    DedupConfig, Deduplicator, LanguageTag, MergePolicy, RawAnnotation, Severity, SplitConfig,
    SplitLabel, StratifiedSplitter,
};

const LANGUAGES: [LanguageTag; 4] = [
    LanguageTag::English,
    LanguageTag::Hindi,
    LanguageTag::EnglishHindi,
    LanguageTag::EnglishTelugu,
];

fn build_annotation(item: &str, annotator: usize, category: Category, step: usize) -> RawAnnotation {
    RawAnnotation {
        item_id: item.to_string(),
        annotator_id: format!("A{annotator:02}"),
        text: format!("content of {item} variant {}", step % 17),
        url: None,
        primary_category: category,
        secondary_tags: BTreeSet::new(),
        severity: (!category.is_benign()).then_some(match step % 3 {
            0 => Severity::Low,
            1 => Severity::Medium,
            _ => Severity::High,
        }),
        language_tag: LANGUAGES[step % LANGUAGES.len()],
        context: None,
        confidence: 0.5 + (step % 5) as f64 / 10.0,
        flags: AnnotationFlags::default(),
        notes: None,
        adjudication: false,
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
            + Duration::minutes(step as i64),
    }
}

/// Deterministic pseudo-random annotation stream covering 1-4 raters per item.
fn annotation_stream(items: usize) -> Vec<RawAnnotation> {
    let mut out = Vec::new();
    let mut step = 0usize;
    for idx in 0..items {
        let item = format!("item_{idx:04}");
        let raters = 1 + idx % 4;
        for rater in 0..raters {
            // Every fifth item gets one dissenting last rater.
            let dissent = usize::from(rater + 1 == raters && raters > 1 && idx % 5 == 0);
            let category = Category::ALL[(idx + dissent) % Category::ALL.len()];
            out.push(build_annotation(&item, rater, category, step));
            step += 1;
        }
    }
    out
}

fn canonical(items: usize) -> Vec<CanonicalRecord> {
    merge_items(group_by_item(annotation_stream(items)), MergePolicy::default())
        .unwrap()
        .resolved
}

#[test]
fn merged_category_is_always_one_of_the_inputs() {
    for (item, annotations) in group_by_item(annotation_stream(400)) {
        let inputs: BTreeSet<Category> =
            annotations.iter().map(|a| a.primary_category).collect();
        match merge_item(&annotations, MergePolicy::default()).unwrap() {
            MergeOutcome::Resolved { record, .. } => {
                assert!(inputs.contains(&record.primary_category), "{item}");
                assert_eq!(record.split_assignment(), None);
            }
            MergeOutcome::Pending { item: pending, .. } => {
                assert_eq!(pending.item_id, item);
                assert!(annotations.len() >= 2);
            }
        }
    }
}

#[test]
fn agreement_is_one_exactly_when_raters_agree() {
    for (_, annotations) in group_by_item(annotation_stream(200)) {
        let report = score_item(&annotations);
        if annotations.len() < 2 {
            assert!(report.is_none());
            continue;
        }
        let report = report.unwrap();
        let unanimous = annotations
            .iter()
            .all(|a| a.primary_category == annotations[0].primary_category);
        assert_eq!(report.coefficient == 1.0, unanimous);
        assert!((-1.0..=1.0).contains(&report.coefficient));
    }
}

#[test]
fn deduplication_is_idempotent() {
    let mut records = canonical(300);
    let copies: Vec<CanonicalRecord> = records
        .iter()
        .take(20)
        .map(|r| {
            let mut copy = r.clone();
            copy.item_id = format!("{}_copy", r.item_id);
            copy.text = r.text.to_uppercase();
            copy
        })
        .collect();
    records.extend(copies);

    let dedup = Deduplicator::new(DedupConfig::default());
    let first = dedup.deduplicate(&records);
    let second = dedup.deduplicate(&first.records);
    assert!(first.report.removed_records >= 20);
    assert_eq!(second.report.removed_records, 0);
    assert_eq!(second.records.len(), first.records.len());
}

#[test]
fn split_union_matches_input_and_is_reproducible() {
    let corpus = CanonicalCorpus::new(canonical(500));
    let splitter = StratifiedSplitter::new(SplitConfig::default(), 42).unwrap();

    let first = splitter.split(corpus.records().to_vec()).unwrap();
    let second = splitter.split(corpus.records().to_vec()).unwrap();
    assert_eq!(first.len(), corpus.len());

    let assignment = |split: &safety_corpus::SplitCorpus| -> BTreeMap<String, SplitLabel> {
        [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test]
            .into_iter()
            .flat_map(|label| {
                split
                    .records(label)
                    .iter()
                    .map(move |r| (r.item_id.clone(), label))
            })
            .collect()
    };
    let first_assignment = assignment(&first);
    assert_eq!(first_assignment.len(), corpus.len());
    assert_eq!(first_assignment, assignment(&second));
    // The shared store is untouched by splitting.
    assert!(corpus.records().iter().all(|r| r.split_assignment().is_none()));
}

#[test]
fn feasible_balance_stays_within_tolerance() {
    let records = canonical(600);
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    for record in &records {
        *counts.entry(record.primary_category).or_insert(0) += 1;
    }
    let share = 1.0 / counts.len() as f64;
    let config = BalanceConfig {
        target: counts.keys().map(|category| (*category, share)).collect(),
        upsample_cap: 3.0,
        ..BalanceConfig::default()
    };
    let balanced = Balancer::new(config.clone(), 42)
        .unwrap()
        .balance(&records)
        .unwrap();
    for entry in &balanced.report.categories {
        assert!(
            (entry.achieved_share - entry.requested_share).abs() <= config.tolerance,
            "{entry:?}"
        );
    }
    assert_eq!(
        balanced.records.len(),
        balanced.report.categories.iter().map(|c| c.achieved).sum::<usize>()
    );
}
