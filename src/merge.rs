//! Consensus merging of an item's annotations into one canonical record.
//!
//! Resolution order: unanimous, strict majority, tie-break (the first
//! adjudication rating), otherwise pending. Single-annotation items become
//! canonical verbatim. Pending items never enter the corpus.

use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agreement::{AgreementReport, score_raters};
use crate::config::{MergePolicy, SeverityTieBreak};
use crate::constants::merge::NOTES_SEPARATOR;
use crate::data::{CanonicalRecord, Category, RawAnnotation, ResolutionMethod, Severity};
use crate::errors::CurationError;
use crate::types::{AnnotatorId, ItemId};

/// Item waiting for an independent tie-break rating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingItem {
    /// Item awaiting the tie-break.
    pub item_id: ItemId,
    /// Independent raters so far.
    pub annotator_ids: Vec<AnnotatorId>,
    /// Category per rater, aligned with `annotator_ids`.
    pub categories: Vec<Category>,
}

/// Result of merging one item.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// The item has a canonical record.
    Resolved {
        /// Merged record.
        record: CanonicalRecord,
        /// Agreement among the independent raters, if there were several.
        agreement: Option<AgreementReport>,
    },
    /// The raters tied and no independent adjudication exists yet.
    Pending {
        /// Item to send for a third rating.
        item: PendingItem,
        /// Agreement among the tied raters.
        agreement: Option<AgreementReport>,
    },
}

impl MergeOutcome {
    /// Agreement report, present for multi-rater items.
    pub fn agreement(&self) -> Option<&AgreementReport> {
        match self {
            MergeOutcome::Resolved { agreement, .. } | MergeOutcome::Pending { agreement, .. } => {
                agreement.as_ref()
            }
        }
    }

    /// The canonical record, or `UnresolvableConflict` for a pending item.
    pub fn into_canonical(self) -> Result<CanonicalRecord, CurationError> {
        match self {
            MergeOutcome::Resolved { record, .. } => Ok(record),
            MergeOutcome::Pending { item, .. } => Err(CurationError::UnresolvableConflict {
                item_id: item.item_id,
            }),
        }
    }
}

/// Merge every annotation of one item.
pub fn merge_item(
    annotations: &[RawAnnotation],
    policy: MergePolicy,
) -> Result<MergeOutcome, CurationError> {
    let first = annotations.first().ok_or(CurationError::EmptyGroup)?;
    if let Some(other) = annotations.iter().find(|a| a.item_id != first.item_id) {
        return Err(CurationError::MixedItems {
            expected: first.item_id.clone(),
            found: other.item_id.clone(),
        });
    }

    let (mut regular, mut adjudications): (Vec<&RawAnnotation>, Vec<&RawAnnotation>) =
        annotations.iter().partition(|a| !a.adjudication);
    // One vote per rater: repeats of an annotator's rating are ignored.
    let mut raters: HashSet<&str> = HashSet::new();
    let submitted = regular.len();
    regular.retain(|a| raters.insert(a.annotator_id.as_str()));
    if regular.len() < submitted {
        debug!(
            "[safety_corpus:merge] item '{}' ignored {} repeat ratings",
            first.item_id,
            submitted - regular.len()
        );
    }
    // A tie-break must come from someone who has not rated the item yet.
    adjudications.retain(|a| !raters.contains(a.annotator_id.as_str()));
    // An adjudication without a prior disagreement is just another rating.
    if regular.len() < 2 {
        regular.extend(
            adjudications
                .drain(..)
                .filter(|a| raters.insert(a.annotator_id.as_str())),
        );
    }

    let agreement = score_raters(&regular);
    let rater_count = regular.len();
    if rater_count == 1 {
        let record = build_record(annotations, &regular, ResolutionMethod::SingleRater, None, policy);
        return Ok(MergeOutcome::Resolved { record, agreement });
    }

    let by_category = tally(regular.iter().map(|a| a.primary_category));
    let top_count = by_category.values().copied().max().unwrap_or(0);
    let top_category = by_category
        .iter()
        .find(|(_, count)| **count == top_count)
        .map(|(category, _)| *category)
        .ok_or(CurationError::EmptyGroup)?;

    let (method, adopted): (ResolutionMethod, Vec<&RawAnnotation>) = if top_count == rater_count {
        (ResolutionMethod::Unanimous, regular.clone())
    } else if top_count * 2 > rater_count {
        let agreeing = regular
            .iter()
            .copied()
            .filter(|a| a.primary_category == top_category)
            .collect();
        (ResolutionMethod::Majority, agreeing)
    } else if let Some(adjudication) = adjudications.first() {
        (ResolutionMethod::TieBreak, vec![*adjudication])
    } else {
        debug!(
            "[safety_corpus:merge] item '{}' has no majority across {} raters; pending tie-break",
            first.item_id, rater_count
        );
        let item = PendingItem {
            item_id: first.item_id.clone(),
            annotator_ids: regular.iter().map(|a| a.annotator_id.clone()).collect(),
            categories: regular.iter().map(|a| a.primary_category).collect(),
        };
        return Ok(MergeOutcome::Pending { item, agreement });
    };

    let score = agreement.as_ref().map(AgreementReport::record_score);
    let record = build_record(annotations, &adopted, method, score, policy);
    Ok(MergeOutcome::Resolved { record, agreement })
}

/// Group annotations by item id, keeping arrival order within and across items.
pub fn group_by_item(annotations: Vec<RawAnnotation>) -> IndexMap<ItemId, Vec<RawAnnotation>> {
    let mut groups: IndexMap<ItemId, Vec<RawAnnotation>> = IndexMap::new();
    for annotation in annotations {
        groups
            .entry(annotation.item_id.clone())
            .or_default()
            .push(annotation);
    }
    groups
}

/// Merge outcomes for a whole batch.
#[derive(Clone, Debug, Default)]
pub struct MergeBatch {
    /// Resolved records ordered by `item_id`.
    pub resolved: Vec<CanonicalRecord>,
    /// Items awaiting a tie-break rating, ordered by `item_id`.
    pub pending: Vec<PendingItem>,
    /// Agreement reports of multi-rater items.
    pub agreements: Vec<AgreementReport>,
}

/// Merge every item group in parallel; output order does not depend on scheduling.
pub fn merge_items(
    groups: IndexMap<ItemId, Vec<RawAnnotation>>,
    policy: MergePolicy,
) -> Result<MergeBatch, CurationError> {
    let mut groups: Vec<(ItemId, Vec<RawAnnotation>)> = groups.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    let outcomes: Vec<Result<MergeOutcome, CurationError>> = groups
        .par_iter()
        .map(|(_, annotations)| merge_item(annotations, policy))
        .collect();

    let mut batch = MergeBatch::default();
    for outcome in outcomes {
        let outcome = outcome?;
        batch.agreements.extend(outcome.agreement().cloned());
        match outcome {
            MergeOutcome::Resolved { record, .. } => batch.resolved.push(record),
            MergeOutcome::Pending { item, .. } => {
                debug!(
                    "[safety_corpus:merge] item '{}' routed to tie-break ({} raters)",
                    item.item_id,
                    item.annotator_ids.len()
                );
                batch.pending.push(item);
            }
        }
    }
    Ok(batch)
}

fn build_record(
    all: &[RawAnnotation],
    adopted: &[&RawAnnotation],
    method: ResolutionMethod,
    agreement_score: Option<f64>,
    policy: MergePolicy,
) -> CanonicalRecord {
    let lead = adopted[0];
    let mut secondary_tags = BTreeSet::new();
    let mut flags = lead.flags;
    for annotation in adopted {
        secondary_tags.extend(annotation.secondary_tags.iter().cloned());
        flags = flags.union(annotation.flags);
    }
    let confidence =
        adopted.iter().map(|a| a.confidence).sum::<f64>() / adopted.len() as f64;

    let mut seen_notes = HashSet::new();
    let notes: Vec<&str> = adopted
        .iter()
        .filter_map(|a| a.notes.as_deref())
        .map(str::trim)
        .filter(|note| !note.is_empty())
        .filter(|note| seen_notes.insert(*note))
        .collect();

    let mut seen_raters = HashSet::new();
    let contributing_annotator_ids = all
        .iter()
        .filter(|a| seen_raters.insert(a.annotator_id.as_str()))
        .map(|a| a.annotator_id.clone())
        .collect();

    CanonicalRecord {
        item_id: lead.item_id.clone(),
        text: lead.text.clone(),
        url: lead.url.clone(),
        primary_category: lead.primary_category,
        secondary_tags,
        severity: merged_severity(adopted, policy.severity_tie_break),
        language_tag: first_plurality(adopted.iter().map(|a| a.language_tag))
            .unwrap_or(lead.language_tag),
        context: first_plurality(adopted.iter().filter_map(|a| a.context)),
        confidence,
        flags,
        notes: (!notes.is_empty()).then(|| notes.join(NOTES_SEPARATOR)),
        created_at: all
            .iter()
            .map(|a| a.created_at)
            .min()
            .unwrap_or(lead.created_at),
        contributing_annotator_ids,
        agreement_score,
        resolution_method: method,
        split_assignment: None,
    }
}

/// Majority severity among adopted raters; ties follow the configured direction.
fn merged_severity(adopted: &[&RawAnnotation], tie_break: SeverityTieBreak) -> Option<Severity> {
    let counts = tally(adopted.iter().filter_map(|a| a.severity));
    let top = counts.values().copied().max()?;
    let tied = counts
        .iter()
        .filter(|(_, count)| **count == top)
        .map(|(severity, _)| *severity);
    match tie_break {
        SeverityTieBreak::Higher => tied.max(),
        SeverityTieBreak::Lower => tied.min(),
    }
}

/// Most frequent value; ties go to the value seen first.
fn first_plurality<T: Copy + Eq + Hash>(values: impl Iterator<Item = T>) -> Option<T> {
    let counts = tally(values);
    let top = counts.values().copied().max()?;
    counts
        .into_iter()
        .find(|(_, count)| *count == top)
        .map(|(value, _)| value)
}

fn tally<T: Copy + Eq + Hash>(values: impl Iterator<Item = T>) -> IndexMap<T, usize> {
    let mut counts = IndexMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}
