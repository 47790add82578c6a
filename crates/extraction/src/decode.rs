//! Grid decoding of downloaded GRIB2 subsets.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use archive_common::{ArchiveError, ArchiveResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use grib2_parser::{
    level_description, Grib2Message, Grib2Reader, Grib2Tables, GridCoordinates, GridDefinition,
};
use tracing::{debug, instrument, warn};

/// Identifies one decoded value array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    /// Parameter short name, e.g. "TMP"
    pub name: String,
    /// Percentile member for probabilistic products
    pub percentile: Option<u8>,
}

impl FieldKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentile: None,
        }
    }

    pub fn percentile(name: impl Into<String>, percentile: u8) -> Self {
        Self {
            name: name.into(),
            percentile: Some(percentile),
        }
    }
}

/// How messages are grouped into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Deterministic fields: first message per parameter wins, percentile
    /// messages are ignored.
    Stacked,
    /// Walk every message and key it by its own percentile attribute;
    /// messages without one are ignored.
    PerMessagePercentile,
}

/// What to pull out of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub mode: DecodeMode,
    /// Parameter names to keep; empty keeps every parameter
    pub names: Vec<String>,
    /// Keep only messages on this (level type, level value)
    pub level: Option<(u8, f64)>,
}

impl DecodeRequest {
    pub fn stacked<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            mode: DecodeMode::Stacked,
            names: names.iter().map(|s| s.as_ref().to_string()).collect(),
            level: None,
        }
    }

    pub fn percentiles() -> Self {
        Self {
            mode: DecodeMode::PerMessagePercentile,
            names: Vec::new(),
            level: None,
        }
    }

    pub fn at_level(mut self, level_type: u8, value: f64) -> Self {
        self.level = Some((level_type, value));
        self
    }

    fn wants(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name)
    }
}

/// Everything decoded from one local file.
#[derive(Debug, Clone)]
pub struct GridDataset {
    pub grid: GridDefinition,
    pub coords: GridCoordinates,
    /// Distinct forecast offsets in hours, ascending
    pub forecast_steps: Vec<i64>,
    /// Distinct valid times, ascending
    pub valid_times: Vec<DateTime<Utc>>,
    /// Values in scan order, NaN where missing
    pub fields: BTreeMap<FieldKey, Vec<f32>>,
}

impl GridDataset {
    /// Deterministic field by parameter name.
    pub fn field(&self, name: &str) -> Option<&[f32]> {
        self.fields.get(&FieldKey::new(name)).map(Vec::as_slice)
    }

    /// Finite value of `key` at `(row, col)`.
    pub fn value_at(&self, key: &FieldKey, row: usize, col: usize) -> Option<f64> {
        let values = self.fields.get(key)?;
        let v = *values.get(self.coords.index(row, col))?;
        v.is_finite().then_some(v as f64)
    }

    /// Percentile members present, ascending, with their parameter name.
    pub fn percentile_keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.keys().filter(|k| k.percentile.is_some())
    }
}

/// Opens a local grid file and yields a [`GridDataset`].
#[async_trait]
pub trait GridDecoder: Send + Sync {
    async fn decode(&self, path: &Path, request: &DecodeRequest) -> ArchiveResult<GridDataset>;
}

/// Decoder backed by the in-workspace GRIB2 parser.
#[derive(Clone)]
pub struct Grib2Decoder {
    tables: Arc<Grib2Tables>,
}

impl Default for Grib2Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Grib2Decoder {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Grib2Tables::ncep()),
        }
    }

    /// Decode an in-memory GRIB2 buffer.
    pub fn decode_bytes(&self, data: Bytes, request: &DecodeRequest) -> ArchiveResult<GridDataset> {
        decode_messages(&self.tables, data, request)
    }
}

#[async_trait]
impl GridDecoder for Grib2Decoder {
    #[instrument(skip(self, request), fields(path = %path.display()))]
    async fn decode(&self, path: &Path, request: &DecodeRequest) -> ArchiveResult<GridDataset> {
        let data = tokio::fs::read(path).await?;
        let tables = self.tables.clone();
        let request = request.clone();

        // Unpacking is CPU bound
        tokio::task::spawn_blocking(move || decode_messages(&tables, Bytes::from(data), &request))
            .await
            .map_err(|e| ArchiveError::Decode(format!("decode task failed: {}", e)))?
    }
}

fn decode_error(context: &str, err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Decode(format!("{}: {}", context, err))
}

fn decode_messages(
    tables: &Grib2Tables,
    data: Bytes,
    request: &DecodeRequest,
) -> ArchiveResult<GridDataset> {
    let messages = Grib2Reader::read_all(data).map_err(|e| decode_error("reading messages", e))?;
    if messages.is_empty() {
        return Err(ArchiveError::Decode("file holds no GRIB2 messages".to_string()));
    }

    let mut grid: Option<GridDefinition> = None;
    let mut fields = BTreeMap::new();
    let mut steps = Vec::new();
    let mut valid_times = Vec::new();

    for message in &messages {
        let Some(key) = select(tables, message, request)? else {
            continue;
        };
        if fields.contains_key(&key) {
            debug!(field = %key.name, percentile = ?key.percentile, "Skipping repeated message");
            continue;
        }

        let definition = message.grid().map_err(|e| decode_error("grid definition", e))?;
        match &grid {
            Some(existing) if existing != &definition => {
                return Err(ArchiveError::Decode(format!(
                    "message {} uses a different grid than earlier messages",
                    key.name
                )));
            }
            Some(_) => {}
            None => grid = Some(definition),
        }

        let product = message.product().map_err(|e| decode_error("product definition", e))?;
        let reference = message.identification.reference_time;
        if let Some(valid) = product.valid_time(reference) {
            valid_times.push(valid);
            steps.push((valid - reference).num_hours());
        }

        let values = message
            .unpack()
            .map_err(|e| decode_error(&format!("unpacking {}", key.name), e))?;
        fields.insert(key, values);
    }

    let Some(grid) = grid else {
        return Err(ArchiveError::Decode(format!(
            "none of {} messages matched the requested fields {:?}",
            messages.len(),
            request.names
        )));
    };
    if request.mode == DecodeMode::Stacked {
        if let Some(missing) = request
            .names
            .iter()
            .find(|name| !fields.contains_key(&FieldKey::new(name.as_str())))
        {
            return Err(ArchiveError::Decode(format!("missing field {}", missing)));
        }
    }

    let coords = grid
        .coordinates()
        .map_err(|e| decode_error("grid coordinates", e))?;

    steps.sort_unstable();
    steps.dedup();
    valid_times.sort_unstable();
    valid_times.dedup();

    Ok(GridDataset {
        grid,
        coords,
        forecast_steps: steps,
        valid_times,
        fields,
    })
}

/// Field key for `message` when the request selects it.
fn select(
    tables: &Grib2Tables,
    message: &Grib2Message,
    request: &DecodeRequest,
) -> ArchiveResult<Option<FieldKey>> {
    let name = match message.parameter(tables) {
        Ok(name) => name,
        Err(e) => {
            warn!(offset = message.offset, error = %e, "Skipping unreadable product definition");
            return Ok(None);
        }
    };
    if !request.wants(&name) {
        return Ok(None);
    }
    let product = message.product().map_err(|e| decode_error("product definition", e))?;
    if let Some((level_type, value)) = request.level {
        if product.level_type != level_type || product.level_value != Some(value) {
            debug!(
                field = %name,
                level = %level_description(product.level_type, product.level_value),
                "Skipping message on another level"
            );
            return Ok(None);
        }
    }

    Ok(match (request.mode, product.percentile) {
        (DecodeMode::Stacked, None) => Some(FieldKey::new(name)),
        (DecodeMode::PerMessagePercentile, Some(p)) => Some(FieldKey::percentile(name, p)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::grib2::LatLonGrid;
    use test_utils::{Grib2Builder, IndexedFile};

    fn grid() -> LatLonGrid {
        LatLonGrid::north_to_south(3, 2, 61.0, 210.0, 1.0)
    }

    fn percentile_file() -> Vec<u8> {
        let mut file = IndexedFile::new();
        for (p, value) in [(10u8, 1.0f32), (50, 2.0), (90, 3.0)] {
            let builder = Grib2Builder::new()
                .with_grid(grid())
                .with_parameter(0, 1, 8)
                .with_level(1, 0)
                .with_forecast_hour(24)
                .with_interval(24, 1)
                .with_percentile(p)
                .with_constant_value(value);
            file = file.push_built(test_utils::init_time(), "APCP:surface:0-1 day acc fcst:", &builder);
        }
        file.bytes
    }

    #[test]
    fn test_percentile_messages_grouped_by_attribute() {
        let decoder = Grib2Decoder::new();
        let dataset = decoder
            .decode_bytes(Bytes::from(percentile_file()), &DecodeRequest::percentiles())
            .unwrap();

        let keys: Vec<_> = dataset.percentile_keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                FieldKey::percentile("APCP", 10),
                FieldKey::percentile("APCP", 50),
                FieldKey::percentile("APCP", 90),
            ]
        );
        let v = dataset.value_at(&FieldKey::percentile("APCP", 90), 1, 2).unwrap();
        assert!((v - 3.0).abs() < 1e-3);
        assert_eq!(dataset.forecast_steps, vec![24]);
    }

    #[test]
    fn test_stacked_mode_ignores_percentiles() {
        let decoder = Grib2Decoder::new();
        let err = decoder
            .decode_bytes(Bytes::from(percentile_file()), &DecodeRequest::stacked(&["APCP"]))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
    }

    #[test]
    fn test_stacked_fields_and_level_filter() {
        let wind = Grib2Builder::new()
            .with_grid(grid())
            .with_parameter(0, 2, 1)
            .with_level(103, 10)
            .with_constant_value(5.0);
        let wind_80m = wind.clone().with_level(103, 80).with_constant_value(9.0);
        let tmp = Grib2Builder::new().with_grid(grid());
        let file = IndexedFile::new()
            .push_built(test_utils::init_time(), "WIND:80 m above ground:anl:", &wind_80m)
            .push_built(test_utils::init_time(), "WIND:10 m above ground:anl:", &wind)
            .push_built(test_utils::init_time(), "TMP:2 m above ground:anl:", &tmp);

        let request = DecodeRequest::stacked(&["WIND"]).at_level(103, 10.0);
        let dataset = Grib2Decoder::new()
            .decode_bytes(Bytes::from(file.bytes), &request)
            .unwrap();

        assert_eq!(dataset.fields.len(), 1);
        let values = dataset.field("WIND").unwrap();
        assert!(values.iter().all(|v| (v - 5.0).abs() < 1e-3));
        assert_eq!((dataset.coords.rows, dataset.coords.cols), (2, 3));
    }

    #[test]
    fn test_missing_requested_field_is_decode_error() {
        let wind = Grib2Builder::new()
            .with_grid(grid())
            .with_parameter(0, 2, 1)
            .with_level(103, 10)
            .with_constant_value(5.0);
        let file = IndexedFile::new().push_built(test_utils::init_time(), "WIND:10 m above ground:anl:", &wind);

        let request = DecodeRequest::stacked(&["WIND", "WDIR"]).at_level(103, 10.0);
        let err = Grib2Decoder::new()
            .decode_bytes(Bytes::from(file.bytes), &request)
            .unwrap_err();
        match err {
            ArchiveError::Decode(message) => assert_eq!(message, "missing field WDIR"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_grids_are_rejected() {
        let a = Grib2Builder::new().with_grid(grid());
        let b = Grib2Builder::new()
            .with_parameter(0, 2, 1)
            .with_grid(LatLonGrid::north_to_south(4, 4, 61.0, 210.0, 1.0));
        let file = IndexedFile::new()
            .push_built(test_utils::init_time(), "TMP:2 m above ground:", &a)
            .push_built(test_utils::init_time(), "WIND:10 m above ground:", &b);

        let err = Grib2Decoder::new()
            .decode_bytes(Bytes::from(file.bytes), &DecodeRequest::stacked::<&str>(&[]))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = Grib2Decoder::new()
            .decode_bytes(Bytes::from_static(b"not a grib file"), &DecodeRequest::percentiles())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
    }

    #[tokio::test]
    async fn test_decode_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subset.grib2");
        std::fs::write(&path, Grib2Builder::new().with_grid(grid()).build()).unwrap();

        let dataset = Grib2Decoder::new()
            .decode(&path, &DecodeRequest::stacked(&["TMP"]))
            .await
            .unwrap();
        assert!(dataset.field("TMP").is_some());
    }
}
