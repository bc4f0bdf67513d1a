//! End-to-end curation run: validate, merge, deduplicate, balance, split.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agreement::{AgreementSummary, summarize};
use crate::balance::{BalanceReport, Balancer};
use crate::config::CurationConfig;
use crate::constants::output::{
    AGREEMENT_REPORT_FILE, DUPLICATE_REPORT_FILE, PENDING_FILE, STATS_FILE, SUMMARY_FILE,
    TEST_FILE, TRAIN_FILE, VALIDATION_FILE, VALIDATION_REPORT_FILE,
};
use crate::corpus::CanonicalCorpus;
use crate::dedup::{DedupReport, Deduplicator};
use crate::errors::CurationError;
use crate::merge::{PendingItem, group_by_item, merge_items};
use crate::metrics::{SplitStats, split_stats};
use crate::splits::{SplitCorpus, SplitReport, StratifiedSplitter};
use crate::transport::fs::{AnnotationStream, OutputWriter};
use crate::types::ItemId;
use crate::validator::{AnnotationRow, RecordValidator, ValidationReport};

/// Contents of `stats.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusReport {
    /// Corpus and per-split statistics.
    pub statistics: SplitStats,
    /// `None` when balancing was disabled.
    pub balance: Option<BalanceReport>,
    /// Stratified split audit.
    pub split: SplitReport,
}

/// Everything one run produces.
#[derive(Clone, Debug)]
pub struct CurationOutput {
    /// Validation results.
    pub validation: ValidationReport,
    /// Agreement across multi-rated items.
    pub agreement: AgreementSummary,
    /// Items awaiting a tie-break rating; absent from every split.
    pub pending: Vec<PendingItem>,
    /// Merged canonical store before deduplication.
    pub corpus: CanonicalCorpus,
    /// Duplicate clusters.
    pub duplicates: DedupReport,
    /// Final train/validation/test records.
    pub splits: SplitCorpus,
    /// Contents of `stats.json`.
    pub report: CorpusReport,
}

impl CurationOutput {
    /// Human-readable run summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let v = &self.validation;
        let _ = writeln!(
            out,
            "validation: {} annotations, {} valid, {} violations, {} warnings",
            v.total,
            v.valid,
            v.violations.len(),
            v.warnings.len()
        );
        for (kind, summary) in &v.by_kind {
            let _ = writeln!(
                out,
                "  {:?}: {} ({} items)",
                kind,
                summary.count,
                summary.item_ids.len()
            );
        }
        let _ = writeln!(
            out,
            "agreement: {} multi-rated items, mean coefficient {:.3}, perfect {:.1}%",
            self.agreement.items_scored,
            self.agreement.mean_coefficient,
            self.agreement.perfect_agreement_rate * 100.0
        );
        let _ = writeln!(
            out,
            "merge: {} canonical records (generation {}), {} pending tie-break",
            self.corpus.len(),
            self.corpus.generation(),
            self.pending.len()
        );
        let _ = writeln!(
            out,
            "dedup: removed {} exact duplicates, {} near-duplicate clusters flagged",
            self.duplicates.removed_records,
            self.duplicates.near_duplicate_clusters.len()
        );
        match &self.report.balance {
            Some(balance) => {
                let _ = writeln!(
                    out,
                    "balance: {} -> {} records",
                    self.corpus.len() - self.duplicates.removed_records,
                    balance.output_total
                );
                for entry in &balance.categories {
                    let _ = writeln!(
                        out,
                        "  {:<16} requested {:>5.1}% achieved {:>5.1}% ({} records)",
                        entry.category.to_string(),
                        entry.requested_share * 100.0,
                        entry.achieved_share * 100.0,
                        entry.achieved
                    );
                }
            }
            None => {
                let _ = writeln!(out, "balance: skipped");
            }
        }
        let split = &self.report.split;
        let _ = writeln!(
            out,
            "split: seed {} train={} validation={} test={}; {} strata forced to train, max drift {:.3}",
            split.seed,
            self.splits.train.len(),
            self.splits.validation.len(),
            self.splits.test.len(),
            split.forced_to_train.len(),
            split.max_drift
        );
        let _ = write!(out, "{}", self.report.statistics);
        out
    }

    /// Write every corpus and report file to `dir`, all or nothing.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, CurationError> {
        let mut writer = OutputWriter::create(dir)?;
        writer.write_jsonl(TRAIN_FILE, &self.splits.train)?;
        writer.write_jsonl(VALIDATION_FILE, &self.splits.validation)?;
        writer.write_jsonl(TEST_FILE, &self.splits.test)?;
        writer.write_jsonl(PENDING_FILE, &self.pending)?;
        writer.write_json(VALIDATION_REPORT_FILE, &self.validation)?;
        writer.write_json(AGREEMENT_REPORT_FILE, &self.agreement)?;
        writer.write_json(DUPLICATE_REPORT_FILE, &self.duplicates)?;
        writer.write_json(STATS_FILE, &self.report)?;
        writer.write_text(SUMMARY_FILE, &self.summary())?;
        let paths = writer.commit()?;
        info!(
            "[safety_corpus:output] wrote {} files to {}",
            paths.len(),
            dir.display()
        );
        Ok(paths)
    }
}

/// Configured curation run.
#[derive(Clone, Debug)]
pub struct CurationPipeline {
    config: CurationConfig,
}

impl CurationPipeline {
    /// Reject invalid configuration before any input is read.
    pub fn new(config: CurationConfig) -> Result<Self, CurationError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration this pipeline runs with.
    pub fn config(&self) -> &CurationConfig {
        &self.config
    }

    /// Read annotation files or directories and run the pipeline.
    pub fn run_paths(&self, inputs: &[PathBuf]) -> Result<CurationOutput, CurationError> {
        let rows = AnnotationStream::new(inputs.iter().cloned()).read_rows()?;
        self.run(&rows)
    }

    /// Run every stage over already-parsed rows.
    pub fn run(&self, rows: &[AnnotationRow]) -> Result<CurationOutput, CurationError> {
        let started = Instant::now();
        let config = &self.config;

        let validator = RecordValidator::new(config.vocabulary.clone());
        let outcome = validator.validate_batch(rows);
        let blocked: BTreeSet<ItemId> = outcome.report.blocked_items();
        if !blocked.is_empty() {
            warn!(
                "[safety_corpus:validate] {} items blocked by {} violations",
                blocked.len(),
                outcome.report.violations.len()
            );
        }
        info!(
            "[safety_corpus:validate] {} of {} annotations valid ({} warnings)",
            outcome.report.valid,
            outcome.report.total,
            outcome.report.warnings.len()
        );
        let admitted: Vec<_> = outcome
            .accepted
            .into_iter()
            .filter(|annotation| !blocked.contains(&annotation.item_id))
            .collect();

        let batch = merge_items(group_by_item(admitted), config.merge)?;
        let corpus = CanonicalCorpus::new(batch.resolved);
        let agreement = summarize(batch.agreements);
        info!(
            "[safety_corpus:merge] {} canonical records, {} pending tie-break, mean agreement {:.3}",
            corpus.len(),
            batch.pending.len(),
            agreement.mean_coefficient
        );

        let dedup = Deduplicator::new(config.dedup).deduplicate(corpus.records());
        info!(
            "[safety_corpus:dedup] {} records after removing {} exact duplicates",
            dedup.records.len(),
            dedup.report.removed_records
        );

        let (records, balance) = if config.balance.is_enabled() {
            let balanced = Balancer::new(config.balance.clone(), config.seed)?
                .balance(&dedup.records)?;
            (balanced.records, Some(balanced.report))
        } else {
            (dedup.records, None)
        };

        let splits =
            StratifiedSplitter::new(config.split.clone(), config.seed)?.split(records)?;
        let statistics = split_stats(&splits, dedup.report.cluster_count());
        info!(
            "[safety_corpus:split] train={} validation={} test={} in {:.2}s",
            splits.train.len(),
            splits.validation.len(),
            splits.test.len(),
            started.elapsed().as_secs_f64()
        );

        let report = CorpusReport {
            statistics,
            balance,
            split: splits.report.clone(),
        };
        Ok(CurationOutput {
            validation: outcome.report,
            agreement,
            pending: batch.pending,
            corpus,
            duplicates: dedup.report,
            splits,
            report,
        })
    }
}
