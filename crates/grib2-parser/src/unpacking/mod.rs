//! GRIB2 data unpacking.
//!
//! Simple packing (template 5.0) is unpacked here, with bitmap support.
//! Complex packing (5.2/5.3) and PNG (5.41) are handed to the `grib` crate.

use std::io::Cursor;

use crate::sections::DataRepresentation;
use crate::{Grib2Error, Grib2Result};

/// Unpack simple packed GRIB2 data.
///
/// `value = (R + X * 2^E) * 10^(-D)`. When a bitmap is present only points
/// with a set bit consume packed bits; the others come back as NaN.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    repr: &DataRepresentation,
    bitmap: Option<&[u8]>,
) -> Grib2Result<Vec<f32>> {
    let binary_scale = 2.0_f64.powi(repr.binary_scale_factor as i32);
    let decimal_scale = 10.0_f64.powi(-(repr.decimal_scale_factor as i32));
    let reference = repr.reference_value as f64;
    let bits = repr.bits_per_value as usize;

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0usize;

    for i in 0..num_points {
        if let Some(bm) = bitmap {
            let present = bm
                .get(i / 8)
                .map(|byte| (byte >> (7 - (i % 8))) & 1 == 1)
                .unwrap_or(false);
            if !present {
                values.push(f32::NAN);
                continue;
            }
        }

        let packed = if bits == 0 {
            0
        } else {
            let packed = extract_bits(packed_data, bit_position, bits)?;
            bit_position += bits;
            packed
        };

        let value = (reference + packed as f64 * binary_scale) * decimal_scale;
        values.push(value as f32);
    }

    Ok(values)
}

/// Decode one field with the `grib` crate.
///
/// `raw_message` is a complete GRIB2 message and `submessage` the index of
/// the field within it.
pub fn unpack_with_grib_crate(raw_message: &[u8], submessage: usize) -> Grib2Result<Vec<f32>> {
    let grib_file = grib::from_reader(Cursor::new(raw_message))
        .map_err(|e| Grib2Error::UnpackingError(format!("grib reader: {}", e)))?;

    let (_, submsg) = grib_file.iter().nth(submessage).ok_or_else(|| {
        Grib2Error::UnpackingError(format!("submessage {} not found", submessage))
    })?;

    let decoder = grib::Grib2SubmessageDecoder::from(submsg)
        .map_err(|e| Grib2Error::UnpackingError(format!("grib decoder: {}", e)))?;
    let values = decoder
        .dispatch()
        .map_err(|e| Grib2Error::UnpackingError(format!("grib dispatch: {}", e)))?;

    Ok(values.collect())
}

/// Extract `num_bits` bits (MSB first) starting at `start_bit`.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Grib2Result<u32> {
    if num_bits > 32 {
        return Err(Grib2Error::UnpackingError(format!(
            "Invalid number of bits: {}",
            num_bits
        )));
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let byte = data.get(absolute_bit / 8).ok_or_else(|| {
            Grib2Error::UnpackingError("Not enough data to extract bits".to_string())
        })?;
        let bit = (byte >> (7 - (absolute_bit % 8))) & 1;
        result = (result << 1) | bit as u32;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repr(reference: f32, e: i16, d: i16, bits: u8) -> DataRepresentation {
        DataRepresentation {
            num_data_points: 0,
            template: 0,
            reference_value: reference,
            binary_scale_factor: e,
            decimal_scale_factor: d,
            bits_per_value: bits,
        }
    }

    #[test]
    fn test_extract_bits() {
        let data = [0b1011_0101];
        assert_eq!(extract_bits(&data, 0, 2).unwrap(), 0b10);
        assert_eq!(extract_bits(&data, 2, 2).unwrap(), 0b11);
        assert_eq!(extract_bits(&data, 0, 8).unwrap(), 0b1011_0101);
        assert!(extract_bits(&data, 4, 8).is_err());
    }

    #[test]
    fn test_simple_unpacking_applies_scales() {
        // X = 100, 200 with R = 0, E = 1, D = 1 -> (0 + X * 2) / 10
        let values = unpack_simple(&[100, 200], 2, &repr(0.0, 1, 1, 8), None).unwrap();
        assert!((values[0] - 20.0).abs() < 1e-4);
        assert!((values[1] - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_bits_yields_reference() {
        let values = unpack_simple(&[], 4, &repr(288.15, 0, 0, 0), None).unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| (v - 288.15).abs() < 1e-4));
    }

    #[test]
    fn test_bitmap_skips_missing_points() {
        // Points 0 and 2 present, point 1 missing; packed data holds two values.
        let bitmap = [0b1010_0000];
        let values = unpack_simple(&[7, 9], 3, &repr(0.0, 0, 0, 8), Some(&bitmap)).unwrap();
        assert_eq!(values[0], 7.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 9.0);
    }
}
