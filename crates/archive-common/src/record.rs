//! Records flowing through the extraction pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Domain, Element, Model};

/// One candidate remote forecast file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastFileRef {
    pub model: Model,
    pub init_time: DateTime<Utc>,
    pub forecast_hour: u32,
    pub domain: Domain,
    pub url: String,
}

impl ForecastFileRef {
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.init_time + Duration::hours(self.forecast_hour as i64)
    }

    /// URL of the side-car index for this file.
    pub fn index_url(&self) -> String {
        format!("{}.idx", self.url)
    }

    /// Local file name used for the downloaded subset.
    pub fn local_file_name(&self) -> String {
        format!(
            "{}_{}_f{:03}_{}.grib2",
            self.model,
            self.init_time.format("%Y%m%d%H"),
            self.forecast_hour,
            self.domain
        )
    }
}

/// One line of a side-car index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub sequence_no: u32,
    pub byte_offset: u64,
    /// Everything after the offset, e.g. `d=2024010100:APCP:surface:0-6 hour acc fcst:`.
    pub field_description: String,
}

impl IndexEntry {
    /// Last non-empty colon-separated token of the description.
    pub fn trailing_token(&self) -> &str {
        self.field_description
            .split(':')
            .map(str::trim)
            .rev()
            .find(|t| !t.is_empty())
            .unwrap_or("")
    }
}

/// A byte range of the remote file holding one matched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRange {
    pub byte_start: u64,
    /// Inclusive end offset; `None` means read to end of file.
    pub byte_end: Option<u64>,
    pub field_description: String,
}

impl MatchedRange {
    /// Value of the HTTP `Range` header for this range.
    pub fn range_header(&self) -> String {
        match self.byte_end {
            Some(end) => format!("bytes={}-{}", self.byte_start, end),
            None => format!("bytes={}-", self.byte_start),
        }
    }

    /// Expected body length, when the range is closed.
    pub fn expected_len(&self) -> Option<u64> {
        self.byte_end.map(|end| end + 1 - self.byte_start)
    }
}

/// A weather station supplied by the metadata collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationLocation {
    pub station_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub zone: Option<String>,
}

impl StationLocation {
    pub fn new(station_id: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            station_id: station_id.into(),
            name: None,
            lat,
            lon,
            elevation: None,
            zone: None,
        }
    }
}

/// Archive deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub station_id: String,
    pub model: Model,
    pub element: Element,
    pub init_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub forecast_hour: u32,
}

/// Point values for one station from one forecast file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub station_id: String,
    pub model: Model,
    pub element: Element,
    pub init_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub forecast_hour: u32,
    /// Canonical field name to value; absent fields are stored as null.
    pub values: BTreeMap<String, f64>,
}

impl ExtractedRecord {
    pub fn new(station_id: impl Into<String>, file: &ForecastFileRef, element: Element) -> Self {
        Self {
            station_id: station_id.into(),
            model: file.model,
            element,
            init_time: file.init_time,
            valid_time: file.valid_time(),
            forecast_hour: file.forecast_hour,
            values: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            station_id: self.station_id.clone(),
            model: self.model,
            element: self.element,
            init_time: self.init_time,
            valid_time: self.valid_time,
            forecast_hour: self.forecast_hour,
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file_ref() -> ForecastFileRef {
        ForecastFileRef {
            model: Model::Nbm,
            init_time: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            forecast_hour: 18,
            domain: Domain::Alaska,
            url: "https://example.com/blend.t12z.core.f018.ak.grib2".to_string(),
        }
    }

    #[test]
    fn test_valid_time_adds_forecast_hour() {
        let file = file_ref();
        assert_eq!(
            file.valid_time(),
            Utc.with_ymd_and_hms(2024, 1, 16, 6, 0, 0).unwrap()
        );
        assert!(file.index_url().ends_with(".grib2.idx"));
        assert_eq!(file.local_file_name(), "nbm_2024011512_f018_ak.grib2");
    }

    #[test]
    fn test_range_header() {
        let closed = MatchedRange {
            byte_start: 100,
            byte_end: Some(199),
            field_description: String::new(),
        };
        assert_eq!(closed.range_header(), "bytes=100-199");
        assert_eq!(closed.expected_len(), Some(100));

        let open = MatchedRange {
            byte_start: 500,
            byte_end: None,
            field_description: String::new(),
        };
        assert_eq!(open.range_header(), "bytes=500-");
        assert_eq!(open.expected_len(), None);
    }

    #[test]
    fn test_trailing_token_skips_empty() {
        let entry = IndexEntry {
            sequence_no: 3,
            byte_offset: 0,
            field_description: "d=2024011512:APCP:surface:0-24 hour acc fcst:50% level:".to_string(),
        };
        assert_eq!(entry.trailing_token(), "50% level");
    }

    #[test]
    fn test_record_key_identifies_row() {
        let file = file_ref();
        let mut a = ExtractedRecord::new("PAFA", &file, Element::MaxT);
        let b = ExtractedRecord::new("PAFA", &file, Element::MaxT);
        a.values.insert("max_temp".to_string(), 12.5);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.value("max_temp"), Some(12.5));
    }
}
