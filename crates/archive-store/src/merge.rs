//! Key-based deduplication of archive rows.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use archive_common::{ExtractedRecord, RecordKey};

/// Row counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub existing: usize,
    pub incoming: usize,
    /// Incoming rows dropped because their key was already present
    pub duplicates: usize,
    pub total: usize,
}

impl MergeStats {
    pub fn added(&self) -> usize {
        self.total.saturating_sub(self.existing)
    }
}

/// Concatenate `existing` and `incoming`, keeping the first row seen for
/// each key. Existing rows come first, so stored data always wins.
///
/// The result is sorted by key.
pub fn merge_records(
    existing: Vec<ExtractedRecord>,
    incoming: Vec<ExtractedRecord>,
) -> (Vec<ExtractedRecord>, MergeStats) {
    let mut stats = MergeStats {
        existing: existing.len(),
        incoming: incoming.len(),
        ..MergeStats::default()
    };

    let mut rows: BTreeMap<RecordKey, ExtractedRecord> = BTreeMap::new();
    for record in existing {
        rows.entry(record.key()).or_insert(record);
    }
    // Existing partitions are already unique; anything collapsed there was
    // never counted as stored
    stats.existing = rows.len();

    for record in incoming {
        match rows.entry(record.key()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(_) => stats.duplicates += 1,
        }
    }

    stats.total = rows.len();
    (rows.into_values().collect(), stats)
}
