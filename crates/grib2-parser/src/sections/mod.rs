//! GRIB2 section parsing.
//!
//! Each parser takes the bytes of one section (starting at its 4-byte
//! length) and returns a typed view of the fields the archiver uses.
//! Byte offsets in comments are 0-based from the start of the section.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{Grib2Error, Grib2Result};

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone, Copy)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
}

/// Section 3: Grid Definition Section
///
/// Angles are kept as raw GRIB2 integers (microdegrees, millimeters) so the
/// definition can be hashed and compared exactly; two messages on the same
/// grid produce equal definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridDefinition {
    pub template: u16,
    pub num_points: u32,
    pub ni: u32,
    pub nj: u32,
    pub earth_shape: u8,
    pub earth_radius_scale: u8,
    pub earth_radius_value: u32,
    pub scanning_mode: u8,
    pub geometry: GridGeometry,
}

/// Template-specific grid geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GridGeometry {
    /// Template 3.0
    LatLon {
        la1: i32,
        lo1: i32,
        la2: i32,
        lo2: i32,
        di: u32,
        dj: u32,
    },
    /// Template 3.20
    PolarStereographic {
        la1: i32,
        lo1: i32,
        lad: i32,
        lov: i32,
        dx: u32,
        dy: u32,
        projection_centre: u8,
    },
    /// Template 3.30
    LambertConformal {
        la1: i32,
        lo1: i32,
        lad: i32,
        lov: i32,
        dx: u32,
        dy: u32,
        projection_centre: u8,
        latin1: i32,
        latin2: i32,
    },
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    /// Code table 4.4 unit of `forecast_time`
    pub time_unit: u8,
    pub forecast_time: i32,
    pub level_type: u8,
    pub level_value: Option<f64>,
    /// Percentile value (templates 4.6 and 4.10)
    pub percentile: Option<u8>,
    /// Code table 4.10 statistical process (statistical templates only)
    pub statistical_process: Option<u8>,
    /// End of the overall time interval (statistical templates only)
    pub interval_end: Option<DateTime<Utc>>,
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from the start of a message
pub fn parse_indicator(data: &[u8]) -> Grib2Result<Indicator> {
    if data.len() < 16 {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Byte 6: discipline, byte 7: edition, bytes 8-15: total message length
    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let message_length = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);

    Ok(Indicator {
        discipline,
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification)
pub fn parse_identification(section: &[u8]) -> Grib2Result<Identification> {
    require_len(section, 1, 21)?;

    // Bytes 5-6: centre, 7-8: sub-centre, 11: significance of reference time,
    // 12-18: reference time (year u16, month, day, hour, minute, second)
    let center = read_u16(section, 5);
    let sub_center = read_u16(section, 7);
    let significance_of_reference_time = section[11];
    let reference_time = read_timestamp(section, 12).ok_or_else(|| Grib2Error::InvalidSection {
        section: 1,
        reason: "Invalid reference time".to_string(),
    })?;

    Ok(Identification {
        center,
        sub_center,
        significance_of_reference_time,
        reference_time,
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(section: &[u8]) -> Grib2Result<GridDefinition> {
    require_len(section, 3, 14)?;

    // Bytes 6-9: number of data points, 12-13: grid definition template
    let num_points = read_u32(section, 6);
    let template = read_u16(section, 12);

    // Template data starts at byte 14. The shape of the earth block
    // (bytes 14-29) is shared by templates 3.0, 3.20 and 3.30.
    let min_len = match template {
        0 => 72,
        20 => 65,
        30 => 81,
        other => {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 3,
                template: other,
            })
        }
    };
    require_len(section, 3, min_len)?;

    let earth_shape = section[14];
    let earth_radius_scale = section[15];
    let earth_radius_value = read_u32(section, 16);
    let ni = read_u32(section, 30);
    let nj = read_u32(section, 34);

    let (geometry, scanning_mode) = match template {
        0 => {
            // 46-49 La1, 50-53 Lo1, 54 flags, 55-58 La2, 59-62 Lo2,
            // 63-66 Di, 67-70 Dj, 71 scanning mode
            let geometry = GridGeometry::LatLon {
                la1: read_i32(section, 46),
                lo1: read_i32(section, 50),
                la2: read_i32(section, 55),
                lo2: read_i32(section, 59),
                di: read_u32(section, 63),
                dj: read_u32(section, 67),
            };
            (geometry, section[71])
        }
        20 => {
            // 38-41 La1, 42-45 Lo1, 46 flags, 47-50 LaD, 51-54 LoV,
            // 55-58 Dx, 59-62 Dy, 63 projection centre, 64 scanning mode
            let geometry = GridGeometry::PolarStereographic {
                la1: read_i32(section, 38),
                lo1: read_i32(section, 42),
                lad: read_i32(section, 47),
                lov: read_i32(section, 51),
                dx: read_u32(section, 55),
                dy: read_u32(section, 59),
                projection_centre: section[63],
            };
            (geometry, section[64])
        }
        _ => {
            // Same as 3.20 up to the scanning mode, then
            // 65-68 Latin1, 69-72 Latin2
            let geometry = GridGeometry::LambertConformal {
                la1: read_i32(section, 38),
                lo1: read_i32(section, 42),
                lad: read_i32(section, 47),
                lov: read_i32(section, 51),
                dx: read_u32(section, 55),
                dy: read_u32(section, 59),
                projection_centre: section[63],
                latin1: read_i32(section, 65),
                latin2: read_i32(section, 69),
            };
            (geometry, section[64])
        }
    };

    Ok(GridDefinition {
        template,
        num_points,
        ni,
        nj,
        earth_shape,
        earth_radius_scale,
        earth_radius_value,
        scanning_mode,
        geometry,
    })
}

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(section: &[u8]) -> Grib2Result<ProductDefinition> {
    require_len(section, 4, 34)?;

    // Bytes 7-8: template number. Templates 4.0-4.15 share the layout of 4.0
    // up to byte 33:
    //   9 category, 10 number, 17 time unit, 18-21 forecast time,
    //   22 first surface type, 23 scale factor, 24-27 scaled value
    let template = read_u16(section, 7);

    let parameter_category = section[9];
    let parameter_number = section[10];
    let time_unit = section[17];
    let forecast_time = read_i32(section, 18);
    let level_type = section[22];
    let level_value = scaled_value(section[23], read_u32(section, 24));

    let percentile = match template {
        6 | 10 => section.get(34).copied(),
        _ => None,
    };

    // Offset of the "end of overall time interval" block for statistical templates
    let interval_offset = match template {
        8 => Some(34),
        9 => Some(47),
        10 => Some(35),
        11 => Some(37),
        12 => Some(36),
        _ => None,
    };

    let (interval_end, statistical_process) = match interval_offset {
        Some(offset) => {
            require_len(section, 4, offset + 13)?;
            let end = read_timestamp(section, offset).ok_or_else(|| Grib2Error::InvalidSection {
                section: 4,
                reason: "Invalid end of overall time interval".to_string(),
            })?;
            (Some(end), Some(section[offset + 12]))
        }
        None => (None, None),
    };

    Ok(ProductDefinition {
        template,
        parameter_category,
        parameter_number,
        time_unit,
        forecast_time,
        level_type,
        level_value,
        percentile,
        statistical_process,
        interval_end,
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(section: &[u8]) -> Grib2Result<DataRepresentation> {
    require_len(section, 5, 11)?;

    // Bytes 5-8: number of data points, 9-10: template number.
    // Templates 5.0, 5.2, 5.3, 5.40 and 5.41 all start with
    //   11-14 reference value (IEEE f32), 15-16 binary scale (E),
    //   17-18 decimal scale (D), 19 bits per value
    let num_data_points = read_u32(section, 5);
    let template = read_u16(section, 9);

    let (reference_value, binary_scale_factor, decimal_scale_factor, bits_per_value) =
        if section.len() >= 20 {
            (
                f32::from_be_bytes([section[11], section[12], section[13], section[14]]),
                read_i16(section, 15),
                read_i16(section, 17),
                section[19],
            )
        } else {
            (0.0, 0, 0, 0)
        };

    Ok(DataRepresentation {
        num_data_points,
        template,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value,
    })
}

impl ProductDefinition {
    /// Forecast time as a duration, when the unit is one we understand.
    pub fn forecast_offset(&self) -> Option<Duration> {
        let t = self.forecast_time as i64;
        match self.time_unit {
            0 => Some(Duration::minutes(t)),
            1 => Some(Duration::hours(t)),
            2 => Some(Duration::days(t)),
            10 => Some(Duration::hours(3 * t)),
            11 => Some(Duration::hours(6 * t)),
            12 => Some(Duration::hours(12 * t)),
            13 => Some(Duration::seconds(t)),
            _ => None,
        }
    }

    /// Time the field is valid at: the interval end for statistical
    /// products, otherwise reference time plus forecast time.
    pub fn valid_time(&self, reference_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval_end
            .or_else(|| self.forecast_offset().map(|offset| reference_time + offset))
    }
}

impl GridDefinition {
    /// Earth radius in meters implied by the shape of the earth code.
    pub fn earth_radius(&self) -> f64 {
        match self.earth_shape {
            0 => 6_367_470.0,
            1 => match scaled_value(self.earth_radius_scale, self.earth_radius_value) {
                Some(r) if r > 0.0 => r,
                _ => projection::EARTH_RADIUS_M,
            },
            _ => projection::EARTH_RADIUS_M,
        }
    }
}

// ===== Helper Functions =====

fn require_len(section: &[u8], number: u8, len: usize) -> Grib2Result<()> {
    if section.len() < len {
        return Err(Grib2Error::InvalidSection {
            section: number,
            reason: format!("Need at least {} bytes, got {}", len, section.len()),
        });
    }
    Ok(())
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// GRIB2 signed integers use sign-and-magnitude, not two's complement.
pub(crate) fn read_i16(data: &[u8], offset: usize) -> i16 {
    let raw = read_u16(data, offset);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub(crate) fn read_i32(data: &[u8], offset: usize) -> i32 {
    let raw = read_u32(data, offset);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Read a year(u16)/month/day/hour/minute/second block.
fn read_timestamp(data: &[u8], offset: usize) -> Option<DateTime<Utc>> {
    let year = read_u16(data, offset) as i32;
    NaiveDate::from_ymd_opt(year, data[offset + 2] as u32, data[offset + 3] as u32)
        .and_then(|date| {
            date.and_hms_opt(
                data[offset + 4] as u32,
                data[offset + 5] as u32,
                data[offset + 6] as u32,
            )
        })
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Apply a (sign-magnitude) scale factor to a scaled value; all-ones means missing.
fn scaled_value(scale: u8, value: u32) -> Option<f64> {
    if scale == 0xFF || value == 0xFFFF_FFFF {
        return None;
    }
    let magnitude = (scale & 0x7F) as i32;
    let factor = if scale & 0x80 != 0 { -magnitude } else { magnitude };
    Some(value as f64 / 10f64.powi(factor))
}
