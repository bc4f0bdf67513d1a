/// Constants used by record validation and vocabularies.
pub mod validation {
    /// Default secondary-tag vocabulary offered to annotators.
    pub const DEFAULT_SECONDARY_TAGS: [&str; 10] = [
        "spam",
        "scam",
        "harassment",
        "doxxing",
        "threat",
        "self_harm",
        "misinformation",
        "impersonation",
        "profanity",
        "sensitive_content",
    ];
    /// Confidence above which an ambiguous-tone judgment is flagged as contradictory.
    pub const AMBIGUOUS_CONFIDENCE_WARN: f64 = 0.7;
    /// Placeholder id used when a record's `item_id` cannot be read.
    pub const UNKNOWN_ITEM_PREFIX: &str = "<line ";
    /// Warning attached to every rating after an annotator's first on an item.
    pub const REPEAT_RATING_WARNING: &str =
        "annotator rated this item more than once; only the first rating counts";
}

/// Constants used by agreement scoring and consensus merging.
pub mod merge {
    /// Separator used when joining notes from several adopted raters.
    pub const NOTES_SEPARATOR: &str = "; ";
    /// Tolerance used when comparing agreement values.
    pub const AGREEMENT_EPSILON: f64 = 1e-12;
}

/// Constants used by duplicate detection.
pub mod dedup {
    /// Default similarity above which two same-category records are near-duplicates.
    pub const DEFAULT_NEAR_DUPLICATE_THRESHOLD: f64 = 0.92;
}

/// Constants used by the balancer.
pub mod balance {
    /// Default cap on upsampling, as a multiple of a category's natural count.
    pub const DEFAULT_UPSAMPLE_CAP: f64 = 1.5;
    /// Default per-category tolerance (absolute proportion) before a target is infeasible.
    pub const DEFAULT_TOLERANCE: f64 = 0.05;
    /// Offset mixed into the seed for downsampling order.
    pub const DOWNSAMPLE_SEED_OFFSET: u64 = 0xBA1A_0CE5;
    /// Tolerance used when checking that target proportions sum to 1.0.
    pub const PROPORTION_SUM_EPSILON: f64 = 1e-6;
}

/// Constants used by the stratified splitter.
pub mod splits {
    use crate::splits::SplitLabel;

    /// Default deterministic seed for sampling and split assignment.
    pub const DEFAULT_SEED: u64 = 42;
    /// Default train fraction.
    pub const DEFAULT_TRAIN_RATIO: f64 = 0.70;
    /// Default validation fraction.
    pub const DEFAULT_VALIDATION_RATIO: f64 = 0.15;
    /// Default test fraction.
    pub const DEFAULT_TEST_RATIO: f64 = 0.15;
    /// Tolerance used when checking that split ratios sum to 1.0.
    pub const RATIO_SUM_EPSILON: f64 = 1e-6;
    /// Default allowed drift between a stratum's share in a split and overall.
    pub const DEFAULT_DRIFT_TOLERANCE: f64 = 0.05;
    /// Offset mixed into the seed for split ordering.
    pub const SPLIT_SEED_OFFSET: u64 = 0x5B17_5EED;
    /// Canonical split iteration order.
    pub const ALL_SPLITS: [SplitLabel; 3] =
        [SplitLabel::Train, SplitLabel::Validation, SplitLabel::Test];
}

/// Constants used by corpus and report files.
pub mod output {
    /// Train split file name.
    pub const TRAIN_FILE: &str = "train.jsonl";
    /// Validation split file name.
    pub const VALIDATION_FILE: &str = "validation.jsonl";
    /// Test split file name.
    pub const TEST_FILE: &str = "test.jsonl";
    /// Items waiting on a tie-break rating.
    pub const PENDING_FILE: &str = "pending.jsonl";
    /// Validation report file name.
    pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";
    /// Agreement report file name.
    pub const AGREEMENT_REPORT_FILE: &str = "agreement_report.json";
    /// Duplicate-cluster report file name.
    pub const DUPLICATE_REPORT_FILE: &str = "duplicate_report.json";
    /// Distribution statistics file name.
    pub const STATS_FILE: &str = "stats.json";
    /// Human-readable summary file name.
    pub const SUMMARY_FILE: &str = "report.txt";
    /// Staging directory used until every output file has been written.
    pub const STAGING_DIR: &str = ".staging";
    /// Subdirectory of the staging area holding replaced outputs until commit succeeds.
    pub const PREVIOUS_DIR: &str = ".previous";
    /// Extension of annotation streams picked up from input directories.
    pub const ANNOTATION_EXTENSION: &str = "jsonl";
}
