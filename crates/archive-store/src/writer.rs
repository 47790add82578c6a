//! Read-merge-write of archive partitions.

use archive_common::{ArchiveError, ArchiveResult, Element, ExtractedRecord, Model};
use metrics::counter;
use tracing::{debug, info, instrument};

use crate::codec::{decode_records, encode_records};
use crate::merge::{merge_records, MergeStats};
use crate::partition::{split_by_month, Partition};
use crate::target::{ArchiveLocation, ArchiveStore};

/// Outcome of writing one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub partition: Partition,
    pub location: ArchiveLocation,
    pub stats: MergeStats,
}

/// Merges new records into stored partitions.
///
/// Assumes a single writer per partition for the duration of a write.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    store: ArchiveStore,
}

impl ArchiveWriter {
    pub fn new(store: ArchiveStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// All rows currently stored in a partition.
    pub async fn read(&self, partition: &Partition) -> ArchiveResult<Vec<ExtractedRecord>> {
        let location = self.store.location(partition);
        match self.store.read(&location).await? {
            Some(data) => decode_records(data),
            None => Ok(Vec::new()),
        }
    }

    /// Merge `records` into `partition`, keeping stored rows on key clashes.
    ///
    /// Every record must belong to the partition's model and element. The
    /// stored file is replaced only after the merged file is fully encoded.
    #[instrument(skip(self, records), fields(partition = %partition, incoming = records.len()))]
    pub async fn write(
        &self,
        partition: &Partition,
        records: Vec<ExtractedRecord>,
    ) -> ArchiveResult<WriteSummary> {
        if let Some(stray) = records
            .iter()
            .find(|r| r.model != partition.model || r.element != partition.element)
        {
            return Err(ArchiveError::Configuration(format!(
                "record {}/{} for {} does not belong in partition {}",
                stray.model, stray.element, stray.station_id, partition
            )));
        }

        let location = self.store.location(partition);
        let existing = match self.store.read(&location).await? {
            Some(data) => decode_records(data)?,
            None => {
                debug!(location = %location, "Partition does not exist yet");
                Vec::new()
            }
        };

        let (rows, stats) = merge_records(existing, records);
        if stats.added() == 0 {
            info!(location = %location, duplicates = stats.duplicates, "Partition already up to date");
            return Ok(WriteSummary {
                partition: *partition,
                location,
                stats,
            });
        }

        let data = encode_records(&rows)?;
        self.store.write(&location, data).await?;

        counter!("archiver_rows_written_total", "model" => partition.model.as_str())
            .increment(stats.added() as u64);
        info!(
            location = %location,
            existing = stats.existing,
            added = stats.added(),
            duplicates = stats.duplicates,
            total = stats.total,
            "Wrote archive partition"
        );

        Ok(WriteSummary {
            partition: *partition,
            location,
            stats,
        })
    }

    /// Split records by valid-time month and write each month's partition.
    pub async fn write_partitioned(
        &self,
        model: Model,
        element: Element,
        records: Vec<ExtractedRecord>,
    ) -> ArchiveResult<Vec<WriteSummary>> {
        let mut summaries = Vec::new();
        for ((year, month), rows) in split_by_month(records) {
            let partition = Partition::new(model, element, year, month);
            summaries.push(self.write(&partition, rows).await?);
        }
        Ok(summaries)
    }
}
