//! Parquet encoding of extracted records.
//!
//! Layout: the six key columns (required) followed by one optional DOUBLE
//! column per value name, in sorted name order. The value columns are the
//! union over all rows; a row without a value writes null.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use archive_common::{ArchiveError, ArchiveResult, Element, ExtractedRecord, Model};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parquet::basic::{Compression, ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field;
use parquet::schema::types::Type;

/// Columns forming the dedup key, in schema order.
pub const KEY_COLUMNS: [&str; 6] = [
    "station_id",
    "model",
    "element",
    "init_time",
    "valid_time",
    "forecast_hour",
];

struct StorageError(String);

impl From<ParquetError> for StorageError {
    fn from(e: ParquetError) -> Self {
        StorageError(e.to_string())
    }
}

impl From<StorageError> for ArchiveError {
    fn from(e: StorageError) -> Self {
        ArchiveError::Storage(format!("parquet: {}", e.0))
    }
}

fn string_column(name: &str) -> Result<Type, StorageError> {
    Ok(Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
        .with_logical_type(Some(LogicalType::String))
        .with_repetition(Repetition::REQUIRED)
        .build()?)
}

fn timestamp_column(name: &str) -> Result<Type, StorageError> {
    Ok(Type::primitive_type_builder(name, PhysicalType::INT64)
        .with_converted_type(ConvertedType::TIMESTAMP_MILLIS)
        .with_repetition(Repetition::REQUIRED)
        .build()?)
}

fn schema(value_names: &[&str]) -> Result<Type, StorageError> {
    let mut fields = vec![
        Arc::new(string_column("station_id")?),
        Arc::new(string_column("model")?),
        Arc::new(string_column("element")?),
        Arc::new(timestamp_column("init_time")?),
        Arc::new(timestamp_column("valid_time")?),
        Arc::new(
            Type::primitive_type_builder("forecast_hour", PhysicalType::INT64)
                .with_repetition(Repetition::REQUIRED)
                .build()?,
        ),
    ];
    for name in value_names {
        fields.push(Arc::new(
            Type::primitive_type_builder(name, PhysicalType::DOUBLE)
                .with_repetition(Repetition::OPTIONAL)
                .build()?,
        ));
    }

    Ok(Type::group_type_builder("forecast_archive")
        .with_fields(fields)
        .build()?)
}

/// Encode records as a single-row-group Parquet file.
pub fn encode_records(records: &[ExtractedRecord]) -> ArchiveResult<Bytes> {
    Ok(encode(records)?)
}

fn encode(records: &[ExtractedRecord]) -> Result<Bytes, StorageError> {
    let value_names: Vec<&str> = records
        .iter()
        .flat_map(|r| r.values.keys().map(String::as_str))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if let Some(clash) = value_names.iter().find(|n| KEY_COLUMNS.contains(n)) {
        return Err(StorageError(format!(
            "value column '{}' collides with a key column",
            clash
        )));
    }

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    {
        let mut writer = SerializedFileWriter::new(
            &mut buffer,
            Arc::new(schema(&value_names)?),
            Arc::new(props),
        )?;
        let mut row_group = writer.next_row_group()?;
        let mut index = 0;

        while let Some(mut column) = row_group.next_column()? {
            match index {
                0..=2 => {
                    let values: Vec<ByteArray> = records
                        .iter()
                        .map(|r| match index {
                            0 => ByteArray::from(r.station_id.as_str()),
                            1 => ByteArray::from(r.model.as_str()),
                            _ => ByteArray::from(r.element.as_str()),
                        })
                        .collect();
                    column
                        .typed::<ByteArrayType>()
                        .write_batch(&values, None, None)?;
                }
                3..=5 => {
                    let values: Vec<i64> = records
                        .iter()
                        .map(|r| match index {
                            3 => r.init_time.timestamp_millis(),
                            4 => r.valid_time.timestamp_millis(),
                            _ => r.forecast_hour as i64,
                        })
                        .collect();
                    column.typed::<Int64Type>().write_batch(&values, None, None)?;
                }
                _ => {
                    let name = value_names[index - KEY_COLUMNS.len()];
                    let cells: Vec<Option<f64>> = records.iter().map(|r| r.value(name)).collect();
                    let present: Vec<f64> = cells.iter().flatten().copied().collect();
                    let def_levels: Vec<i16> =
                        cells.iter().map(|c| i16::from(c.is_some())).collect();
                    column
                        .typed::<DoubleType>()
                        .write_batch(&present, Some(def_levels.as_slice()), None)?;
                }
            }
            column.close()?;
            index += 1;
        }

        row_group.close()?;
        writer.close()?;
    }

    Ok(Bytes::from(buffer))
}

/// Decode every row of a Parquet file written by [`encode_records`].
pub fn decode_records(data: Bytes) -> ArchiveResult<Vec<ExtractedRecord>> {
    let reader = SerializedFileReader::new(data).map_err(StorageError::from)?;
    let rows = reader.get_row_iter(None).map_err(StorageError::from)?;

    let mut records = Vec::new();
    for row in rows {
        let row = row.map_err(StorageError::from)?;
        let mut builder = RowBuilder::default();
        for (name, field) in row.get_column_iter() {
            builder.set(name, field)?;
        }
        records.push(builder.finish()?);
    }
    Ok(records)
}

#[derive(Default)]
struct RowBuilder {
    station_id: Option<String>,
    model: Option<Model>,
    element: Option<Element>,
    init_time: Option<DateTime<Utc>>,
    valid_time: Option<DateTime<Utc>>,
    forecast_hour: Option<u32>,
    values: std::collections::BTreeMap<String, f64>,
}

impl RowBuilder {
    fn set(&mut self, name: &str, field: &Field) -> ArchiveResult<()> {
        match name {
            "station_id" => self.station_id = Some(text(name, field)?),
            "model" => self.model = Some(Model::from_str(&text(name, field)?)?),
            "element" => self.element = Some(Element::from_str(&text(name, field)?)?),
            "init_time" => self.init_time = Some(timestamp(name, field)?),
            "valid_time" => self.valid_time = Some(timestamp(name, field)?),
            "forecast_hour" => {
                let hour = integer(name, field)?;
                self.forecast_hour = Some(u32::try_from(hour).map_err(|_| {
                    ArchiveError::Storage(format!("forecast_hour out of range: {}", hour))
                })?);
            }
            _ => match field {
                Field::Null => {}
                Field::Double(v) => {
                    self.values.insert(name.to_string(), *v);
                }
                Field::Float(v) => {
                    self.values.insert(name.to_string(), f64::from(*v));
                }
                other => return Err(unexpected(name, other)),
            },
        }
        Ok(())
    }

    fn finish(self) -> ArchiveResult<ExtractedRecord> {
        let missing = |column: &str| ArchiveError::Storage(format!("archive row has no {}", column));
        Ok(ExtractedRecord {
            station_id: self.station_id.ok_or_else(|| missing("station_id"))?,
            model: self.model.ok_or_else(|| missing("model"))?,
            element: self.element.ok_or_else(|| missing("element"))?,
            init_time: self.init_time.ok_or_else(|| missing("init_time"))?,
            valid_time: self.valid_time.ok_or_else(|| missing("valid_time"))?,
            forecast_hour: self.forecast_hour.ok_or_else(|| missing("forecast_hour"))?,
            values: self.values,
        })
    }
}

fn unexpected(name: &str, field: &Field) -> ArchiveError {
    ArchiveError::Storage(format!("unexpected value in column {}: {:?}", name, field))
}

fn text(name: &str, field: &Field) -> ArchiveResult<String> {
    match field {
        Field::Str(s) => Ok(s.clone()),
        Field::Bytes(b) => b
            .as_utf8()
            .map(str::to_string)
            .map_err(|e| ArchiveError::Storage(format!("column {} is not UTF-8: {}", name, e))),
        other => Err(unexpected(name, other)),
    }
}

fn integer(name: &str, field: &Field) -> ArchiveResult<i64> {
    match field {
        Field::Long(v) => Ok(*v),
        Field::Int(v) => Ok(i64::from(*v)),
        other => Err(unexpected(name, other)),
    }
}

fn timestamp(name: &str, field: &Field) -> ArchiveResult<DateTime<Utc>> {
    let millis = match field {
        Field::TimestampMillis(v) => *v,
        other => integer(name, other)?,
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ArchiveError::Storage(format!("invalid {} timestamp: {}", name, millis)))
}
