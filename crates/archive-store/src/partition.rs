//! Monthly partitions and their storage paths.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use archive_common::{Element, ExtractedRecord, Model};
use chrono::Datelike;

/// One monthly archive segment of a model/element pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    pub model: Model,
    pub element: Element,
    pub year: i32,
    pub month: u32,
}

impl Partition {
    pub fn new(model: Model, element: Element, year: i32, month: u32) -> Self {
        Self {
            model,
            element,
            year,
            month,
        }
    }

    /// Format: {root}/{model}/{element}/{YYYY}_{MM}_archive.parquet
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(self.model.as_str())
            .join(self.element.as_str())
            .join(format!("{:04}_{:02}_archive.parquet", self.year, self.month))
    }

    /// Format: {prefix}/{model}/{YYYY}_{MM}_{model}_{element}_archive.parquet
    pub fn object_key(&self, prefix: &str) -> String {
        let name = format!(
            "{}/{:04}_{:02}_{}_{}_archive.parquet",
            self.model, self.year, self.month, self.model, self.element
        );
        match prefix.trim_matches('/') {
            "" => name,
            prefix => format!("{}/{}", prefix, name),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:04}-{:02}",
            self.model, self.element, self.year, self.month
        )
    }
}

/// Group records by the calendar month of their valid time.
pub fn split_by_month(records: Vec<ExtractedRecord>) -> BTreeMap<(i32, u32), Vec<ExtractedRecord>> {
    let mut months: BTreeMap<(i32, u32), Vec<ExtractedRecord>> = BTreeMap::new();
    for record in records {
        let key = (record.valid_time.year(), record.valid_time.month());
        months.entry(key).or_default().push(record);
    }
    months
}
