#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Inter-rater agreement scoring.
pub mod agreement;
/// clap-driven runner behind the `curate` binary.
pub mod apps;
/// Category rebalancing.
pub mod balance;
/// Curation configuration types.
pub mod config;
/// Centralized constants used across stages and outputs.
pub mod constants;
/// Immutable canonical record store.
pub mod corpus;
/// Annotation and canonical record types.
pub mod data;
/// Exact and near-duplicate detection.
pub mod dedup;
mod hash;
/// Consensus merging of multi-annotator items.
pub mod merge;
/// Distribution and quality statistics.
pub mod metrics;
/// End-to-end curation pipeline.
pub mod pipeline;
/// Stratified train/validation/test splitting.
pub mod splits;
/// Filesystem input and staged output.
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Text normalization helpers.
pub mod utils;
/// Per-record validation.
pub mod validator;

mod errors;

pub use agreement::{AgreementReport, AgreementSummary};
pub use balance::{BalanceReport, BalancedSet, Balancer};
pub use config::{
    BalanceConfig, CurationConfig, DedupConfig, MergePolicy, SeverityTieBreak, SplitConfig,
    VocabularyConfig,
};
pub use corpus::CanonicalCorpus;
pub use data::{
    AnnotationFlags, CanonicalRecord, Category, ContentContext, LanguageTag, RawAnnotation,
    ResolutionMethod, Severity,
};
pub use dedup::{DedupOutcome, DedupReport, Deduplicator};
pub use errors::{CategoryDeviation, CurationError};
pub use merge::{MergeBatch, MergeOutcome, PendingItem};
pub use metrics::{CorpusStats, SplitStats};
pub use pipeline::{CurationOutput, CurationPipeline};
pub use splits::{SplitCorpus, SplitLabel, SplitRatios, StratificationKey, StratifiedSplitter};
pub use types::{AnnotatorId, ItemId, SecondaryTag, StratumKey};
pub use validator::{RecordValidator, ValidationReport, Violation, ViolationKind};
