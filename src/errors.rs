use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::data::Category;
use crate::types::ItemId;

/// Batch-level error type for configuration, IO, and stage failures.
///
/// Per-record validation problems are not errors at this level; they are
/// [`crate::validator::Violation`] values collected into a report.
#[derive(Debug, Error)]
pub enum CurationError {
    /// An input line is not a JSON object.
    #[error("malformed input at {}:{line}: {reason}", .path.display())]
    MalformedInput {
        /// File containing the line.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },
    /// Invalid settings or input paths.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An input directory entry could not be read.
    #[error("cannot walk input {}: {source}", .path.display())]
    InputWalk {
        /// Entry that failed.
        path: PathBuf,
        /// Underlying walk error.
        source: walkdir::Error,
    },
    /// A pending item was asked for its canonical record.
    #[error("item '{item_id}' has no majority and no tie-break rating yet")]
    UnresolvableConflict {
        /// Pending item.
        item_id: ItemId,
    },
    /// Balancing cannot reach the target within tolerance.
    #[error("target distribution is infeasible: {}", describe_deviations(.deviations))]
    InfeasibleTarget {
        /// Categories outside tolerance.
        deviations: Vec<CategoryDeviation>,
        /// Best reachable count per category.
        achieved_counts: Vec<(Category, usize)>,
    },
    /// A record already carries a split label.
    #[error("record '{item_id}' already assigned to a split")]
    SplitAlreadyAssigned {
        /// Record assigned twice.
        item_id: ItemId,
    },
    /// A merge was called without annotations.
    #[error("cannot merge an empty annotation group")]
    EmptyGroup,
    /// A merge was called with annotations of different items.
    #[error("annotations for different items passed to one merge: '{expected}' vs '{found}'")]
    MixedItems {
        /// Item of the first annotation.
        expected: ItemId,
        /// First annotation of another item.
        found: ItemId,
    },
    /// Report or corpus serialization failed.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Requested vs achieved proportion for one category.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CategoryDeviation {
    /// Target category.
    pub category: Category,
    /// Requested proportion.
    pub requested: f64,
    /// Proportion actually reachable.
    pub achieved: f64,
}

impl CategoryDeviation {
    /// Absolute deviation in proportion units.
    pub fn deviation(&self) -> f64 {
        (self.requested - self.achieved).abs()
    }
}

fn describe_deviations(deviations: &[CategoryDeviation]) -> String {
    deviations
        .iter()
        .map(|d| {
            format!(
                "{} requested {:.1}% achieved {:.1}%",
                d.category,
                d.requested * 100.0,
                d.achieved * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
