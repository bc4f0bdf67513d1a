use std::sync::Arc;

use crate::data::CanonicalRecord;

/// Generation of a corpus derived straight from raw annotations.
pub const FIRST_GENERATION: u64 = 1;

/// Immutable canonical store for one pipeline run.
///
/// Built once from the merger output and shared by reference with every
/// downstream stage. Cloning shares the same backing slice.
#[derive(Clone, Debug)]
pub struct CanonicalCorpus {
    generation: u64,
    records: Arc<[CanonicalRecord]>,
}

impl CanonicalCorpus {
    /// Freeze `records` (sorted by `item_id`) as the first generation.
    pub fn new(records: Vec<CanonicalRecord>) -> Self {
        Self::with_generation(FIRST_GENERATION, records)
    }

    /// Freeze `records` under an explicit generation number.
    pub fn with_generation(generation: u64, mut records: Vec<CanonicalRecord>) -> Self {
        records.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        Self {
            generation,
            records: records.into(),
        }
    }

    /// Successor store re-derived from raw annotations; `self` stays untouched.
    pub fn regenerate(&self, records: Vec<CanonicalRecord>) -> Self {
        Self::with_generation(self.generation + 1, records)
    }

    /// Number of derivations this store descends from, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Records ordered by `item_id`.
    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Binary-search lookup by item id.
    pub fn get(&self, item_id: &str) -> Option<&CanonicalRecord> {
        self.records
            .binary_search_by(|record| record.item_id.as_str().cmp(item_id))
            .ok()
            .map(|idx| &self.records[idx])
    }
}
