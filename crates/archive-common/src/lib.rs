//! Common types shared across the forecast archiver crates.

pub mod error;
pub mod model;
pub mod record;
pub mod time;

pub use error::{ArchiveError, ArchiveResult};
pub use model::{Domain, Element, Model};
pub use record::{
    ExtractedRecord, ForecastFileRef, IndexEntry, MatchedRange, RecordKey, StationLocation,
};
pub use time::{init_times, month_chunks, MonthChunk};
