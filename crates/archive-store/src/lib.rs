//! Archive Writer: Parquet partitions of extracted station forecasts.
//!
//! Every write is a read-merge-write of one partition. Rows are keyed by
//! [`archive_common::RecordKey`]; when a key is already stored, the stored row
//! is kept and the incoming duplicate dropped, so reruns over the same range
//! leave the archive unchanged.

pub mod codec;
pub mod merge;
pub mod partition;
pub mod target;
pub mod writer;

pub use codec::{decode_records, encode_records, KEY_COLUMNS};
pub use merge::{merge_records, MergeStats};
pub use partition::{split_by_month, Partition};
pub use target::{ArchiveLocation, ArchiveStore, S3Settings};
pub use writer::{ArchiveWriter, WriteSummary};
