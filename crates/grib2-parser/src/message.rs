//! GRIB2 message walking.
//!
//! A [`Grib2Reader`] splits a byte buffer into messages and each message into
//! its fields. Sections are kept as cheap `Bytes` slices and only parsed when
//! asked for, so a file can be scanned by parameter without decoding grids
//! it does not need.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::sections::{
    parse_data_representation, parse_grid_definition, parse_identification, parse_indicator,
    parse_product_definition, read_u32, DataRepresentation, GridDefinition, Identification,
    Indicator, ProductDefinition,
};
use crate::tables::Grib2Tables;
use crate::unpacking::{unpack_simple, unpack_with_grib_crate};
use crate::{Grib2Error, Grib2Result};

/// One field of a GRIB2 file (a message, or a submessage when sections 2-7 repeat).
#[derive(Debug, Clone)]
pub struct Grib2Message {
    pub indicator: Indicator,
    pub identification: Identification,
    /// Byte offset of the enclosing message within the reader's buffer
    pub offset: usize,
    /// Index of this field within the enclosing message
    pub submessage: usize,
    raw: Bytes,
    grid_section: Bytes,
    product_section: Bytes,
    representation_section: Bytes,
    bitmap: Option<Bytes>,
    data: Bytes,
}

impl Grib2Message {
    pub fn grid(&self) -> Grib2Result<GridDefinition> {
        parse_grid_definition(&self.grid_section)
    }

    pub fn product(&self) -> Grib2Result<ProductDefinition> {
        parse_product_definition(&self.product_section)
    }

    pub fn data_representation(&self) -> Grib2Result<DataRepresentation> {
        parse_data_representation(&self.representation_section)
    }

    /// Short parameter name, e.g. "APCP".
    pub fn parameter(&self, tables: &Grib2Tables) -> Grib2Result<String> {
        let product = self.product()?;
        Ok(tables.parameter_name(
            self.indicator.discipline,
            product.parameter_category,
            product.parameter_number,
        ))
    }

    /// The complete enclosing message.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Unpack all grid values in scan order; missing points are NaN.
    pub fn unpack(&self) -> Grib2Result<Vec<f32>> {
        let grid = self.grid()?;
        let repr = self.data_representation()?;
        let num_points = grid.num_points as usize;

        let values = match repr.template {
            0 => unpack_simple(&self.data, num_points, &repr, self.bitmap.as_deref())?,
            _ => unpack_with_grib_crate(&self.raw, self.submessage)?,
        };

        if values.len() != num_points {
            return Err(Grib2Error::UnpackingError(format!(
                "expected {} values, got {}",
                num_points,
                values.len()
            )));
        }
        Ok(values)
    }
}

/// Sequential reader over the GRIB2 messages in a buffer.
pub struct Grib2Reader {
    data: Bytes,
    offset: usize,
    pending: VecDeque<Grib2Message>,
}

impl Grib2Reader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            pending: VecDeque::new(),
        }
    }

    /// Next field, or `None` at end of buffer.
    pub fn next_message(&mut self) -> Grib2Result<Option<Grib2Message>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }

            let Some(start) = find_magic(&self.data, self.offset) else {
                return Ok(None);
            };
            if start != self.offset {
                debug!(skipped = start - self.offset, "Skipping bytes between GRIB2 messages");
            }

            let indicator = parse_indicator(&self.data[start..])?;
            let length = indicator.message_length as usize;
            if length < 16 || start + length > self.data.len() {
                return Err(Grib2Error::InvalidFormat(format!(
                    "truncated message at offset {}: declared {} bytes, {} available",
                    start,
                    length,
                    self.data.len() - start
                )));
            }

            let raw = self.data.slice(start..start + length);
            self.offset = start + length;
            self.pending = split_fields(raw, indicator, start)?.into();
        }
    }

    /// Read every field in the buffer.
    pub fn read_all(data: Bytes) -> Grib2Result<Vec<Grib2Message>> {
        let mut reader = Self::new(data);
        let mut messages = Vec::new();
        while let Some(message) = reader.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }
}

fn find_magic(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(4)
        .position(|w| w == b"GRIB")
        .map(|pos| from + pos)
}

/// Walk sections 1-7 of one message, emitting a field at every section 7.
fn split_fields(raw: Bytes, indicator: Indicator, offset: usize) -> Grib2Result<Vec<Grib2Message>> {
    let mut fields = Vec::new();
    let mut identification = None;
    let mut grid_section = None;
    let mut product_section = None;
    let mut representation_section = None;
    let mut bitmap: Option<Bytes> = None;
    let mut previous_bitmap: Option<Bytes> = None;

    let mut pos = 16;
    while pos + 4 <= raw.len() {
        if &raw[pos..pos + 4] == b"7777" {
            break;
        }
        if pos + 5 > raw.len() {
            break;
        }

        let section_len = read_u32(&raw, pos) as usize;
        let number = raw[pos + 4];
        if section_len < 5 || pos + section_len > raw.len() {
            return Err(Grib2Error::InvalidSection {
                section: number,
                reason: format!("Invalid section length {} at offset {}", section_len, pos),
            });
        }
        let section = raw.slice(pos..pos + section_len);

        match number {
            1 => identification = Some(parse_identification(&section)?),
            2 => {}
            3 => grid_section = Some(section),
            4 => product_section = Some(section),
            5 => representation_section = Some(section),
            6 => {
                let indicator_byte = section.get(5).copied().unwrap_or(255);
                bitmap = match indicator_byte {
                    0 => {
                        let map = section.slice(6..);
                        previous_bitmap = Some(map.clone());
                        Some(map)
                    }
                    254 => Some(previous_bitmap.clone().ok_or_else(|| {
                        Grib2Error::InvalidSection {
                            section: 6,
                            reason: "Reuse of undefined bitmap".to_string(),
                        }
                    })?),
                    255 => None,
                    other => {
                        return Err(Grib2Error::UnsupportedTemplate {
                            section: 6,
                            template: other as u16,
                        })
                    }
                };
            }
            7 => {
                let missing = |name: &str| Grib2Error::InvalidSection {
                    section: 7,
                    reason: format!("Data section without preceding {}", name),
                };
                fields.push(Grib2Message {
                    indicator,
                    identification: identification
                        .clone()
                        .ok_or_else(|| missing("identification section"))?,
                    offset,
                    submessage: fields.len(),
                    raw: raw.clone(),
                    grid_section: grid_section.clone().ok_or_else(|| missing("grid section"))?,
                    product_section: product_section
                        .clone()
                        .ok_or_else(|| missing("product section"))?,
                    representation_section: representation_section
                        .clone()
                        .ok_or_else(|| missing("data representation section"))?,
                    bitmap: bitmap.clone(),
                    data: section.slice(5..),
                });
            }
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: other,
                    reason: "Unknown section number".to_string(),
                })
            }
        }

        pos += section_len;
    }

    if fields.is_empty() {
        return Err(Grib2Error::InvalidFormat(format!(
            "message at offset {} has no data section",
            offset
        )));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_has_no_messages() {
        let mut reader = Grib2Reader::new(Bytes::new());
        assert!(reader.next_message().unwrap().is_none());
    }

    #[test]
    fn test_truncated_message_is_error() {
        let mut data = vec![0u8; 16];
        data[0..4].copy_from_slice(b"GRIB");
        data[7] = 2;
        data[15] = 200;
        let mut reader = Grib2Reader::new(Bytes::from(data));
        assert!(reader.next_message().is_err());
    }

    #[test]
    fn test_find_magic_skips_padding() {
        let data = b"\0\0GRIBxx";
        assert_eq!(find_magic(data, 0), Some(2));
        assert_eq!(find_magic(data, 3), None);
    }
}
