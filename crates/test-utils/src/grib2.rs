//! Synthetic GRIB2 message builder.
//!
//! Produces complete, standards-shaped GRIB2 messages: a regular lat/lon grid
//! (template 3.0), one of product templates 4.0, 4.6, 4.8 or 4.10, simple
//! packing (template 5.0) and an optional bitmap for NaN values. Signed
//! fields are written sign-and-magnitude as the format requires.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Grid layout of a synthetic message, in degrees.
#[derive(Debug, Clone, Copy)]
pub struct LatLonGrid {
    pub ni: u32,
    pub nj: u32,
    pub la1: f64,
    pub lo1: f64,
    pub di: f64,
    pub dj: f64,
    /// Scanning mode flags (code table 3.4); 0 scans north to south
    pub scanning_mode: u8,
}

impl LatLonGrid {
    /// Grid scanning west to east then north to south from `(la1, lo1)`.
    pub fn north_to_south(ni: u32, nj: u32, la1: f64, lo1: f64, step: f64) -> Self {
        Self {
            ni,
            nj,
            la1,
            lo1,
            di: step,
            dj: step,
            scanning_mode: 0,
        }
    }

    pub fn num_points(&self) -> usize {
        (self.ni * self.nj) as usize
    }

    fn last_point(&self) -> (f64, f64) {
        let rows = (self.nj.saturating_sub(1)) as f64;
        let cols = (self.ni.saturating_sub(1)) as f64;
        let lat = if self.scanning_mode & 0x40 != 0 {
            self.la1 + rows * self.dj
        } else {
            self.la1 - rows * self.dj
        };
        (lat, self.lo1 + cols * self.di)
    }
}

impl Default for LatLonGrid {
    fn default() -> Self {
        Self::north_to_south(10, 10, 50.0, 250.0, 1.0)
    }
}

/// Statistical interval carried by templates 4.8 and 4.10.
#[derive(Debug, Clone, Copy)]
struct Interval {
    hours: u32,
    process: u8,
}

/// Builder for one synthetic GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    reference_time: DateTime<Utc>,
    discipline: u8,
    category: u8,
    number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    percentile: Option<u8>,
    interval: Option<Interval>,
    grid: LatLonGrid,
    decimal_scale: i16,
    data: Option<Vec<f32>>,
}

impl Default for Grib2Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Grib2Builder {
    /// 2 m temperature on a 10x10 one-degree grid, analysis time 2024-01-15 12Z.
    pub fn new() -> Self {
        Self {
            reference_time: Utc
                .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
                .single()
                .unwrap_or_default(),
            discipline: 0,
            category: 0,
            number: 0,
            level_type: 103,
            level_value: 2,
            forecast_hour: 0,
            percentile: None,
            interval: None,
            grid: LatLonGrid::default(),
            decimal_scale: 2,
            data: None,
        }
    }

    pub fn with_reference_time(mut self, time: DateTime<Utc>) -> Self {
        self.reference_time = time;
        self
    }

    /// Parameter codes (discipline, category, number), e.g. (0, 1, 8) for APCP.
    pub fn with_parameter(mut self, discipline: u8, category: u8, number: u8) -> Self {
        self.discipline = discipline;
        self.category = category;
        self.number = number;
        self
    }

    /// First fixed surface (code table 4.5) and its unscaled value.
    pub fn with_level(mut self, level_type: u8, value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    /// Percentile member; selects template 4.6, or 4.10 with an interval.
    pub fn with_percentile(mut self, percentile: u8) -> Self {
        self.percentile = Some(percentile);
        self
    }

    /// Statistical interval ending at the forecast hour; selects template 4.8,
    /// or 4.10 with a percentile. `process` follows code table 4.10
    /// (1 accumulation, 2 maximum, 3 minimum).
    pub fn with_interval(mut self, hours: u32, process: u8) -> Self {
        self.interval = Some(Interval { hours, process });
        self
    }

    pub fn with_grid(mut self, grid: LatLonGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Number of decimal digits kept by the packer.
    pub fn with_decimal_scale(mut self, digits: i16) -> Self {
        self.decimal_scale = digits;
        self
    }

    /// Values in scan order; NaN entries are written as bitmap-missing points.
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data = Some(vec![value; self.grid.num_points()]);
        self
    }

    /// Product definition template number implied by the options set.
    pub fn product_template(&self) -> u16 {
        match (self.percentile.is_some(), self.interval.is_some()) {
            (false, false) => 0,
            (true, false) => 6,
            (false, true) => 8,
            (true, true) => 10,
        }
    }

    /// Encode the complete message.
    pub fn build(&self) -> Vec<u8> {
        let num_points = self.grid.num_points();
        let data = self
            .data
            .clone()
            .unwrap_or_else(|| (0..num_points).map(|i| i as f32).collect());
        assert_eq!(
            data.len(),
            num_points,
            "data length must match the {}x{} grid",
            self.grid.ni,
            self.grid.nj
        );

        let mut body = Vec::new();
        body.extend(self.identification_section());
        body.extend(self.grid_section());
        body.extend(self.product_section());

        let present: Vec<f32> = data.iter().copied().filter(|v| !v.is_nan()).collect();
        let (representation, packed) = self.pack(&present);
        body.extend(representation);
        body.extend(bitmap_section(&data));

        let mut data_section = Vec::new();
        push_u32(&mut data_section, (5 + packed.len()) as u32);
        data_section.push(7);
        data_section.extend(packed);
        body.extend(data_section);

        let total = 16 + body.len() + 4;
        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2);
        message.extend_from_slice(&(total as u64).to_be_bytes());
        message.extend(body);
        message.extend_from_slice(b"7777");
        message
    }

    fn identification_section(&self) -> Vec<u8> {
        let mut s = Vec::with_capacity(21);
        push_u32(&mut s, 21);
        s.push(1);
        push_u16(&mut s, 7); // NCEP
        push_u16(&mut s, 14); // MDL
        s.push(2);
        s.push(1);
        s.push(1); // start of forecast
        push_timestamp(&mut s, self.reference_time);
        s.push(0);
        s.push(1);
        s
    }

    fn grid_section(&self) -> Vec<u8> {
        let g = &self.grid;
        let (la2, lo2) = g.last_point();
        let mut s = Vec::with_capacity(72);
        push_u32(&mut s, 72);
        s.push(3);
        s.push(0);
        push_u32(&mut s, g.num_points() as u32);
        s.push(0);
        s.push(0);
        push_u16(&mut s, 0);
        s.push(6); // spherical earth, radius 6,371,229 m
        s.push(0);
        push_u32(&mut s, 0);
        s.push(0);
        push_u32(&mut s, 0);
        s.push(0);
        push_u32(&mut s, 0);
        push_u32(&mut s, g.ni);
        push_u32(&mut s, g.nj);
        push_u32(&mut s, 0);
        push_u32(&mut s, 0xFFFF_FFFF);
        push_i32(&mut s, micro(g.la1));
        push_i32(&mut s, micro(g.lo1));
        s.push(0x30);
        push_i32(&mut s, micro(la2));
        push_i32(&mut s, micro(lo2));
        push_u32(&mut s, micro(g.di) as u32);
        push_u32(&mut s, micro(g.dj) as u32);
        s.push(g.scanning_mode);
        debug_assert_eq!(s.len(), 72);
        s
    }

    fn product_section(&self) -> Vec<u8> {
        let template = self.product_template();
        let mut s = Vec::with_capacity(59);
        push_u32(&mut s, 0); // patched below
        s.push(4);
        push_u16(&mut s, 0);
        push_u16(&mut s, template);
        s.push(self.category);
        s.push(self.number);
        s.push(2); // forecast
        s.push(0);
        s.push(0);
        push_u16(&mut s, 0);
        s.push(0);
        s.push(1); // hours

        // Statistical products carry the start of the interval as forecast time
        let start = match self.interval {
            Some(interval) => self.forecast_hour.saturating_sub(interval.hours),
            None => self.forecast_hour,
        };
        push_i32(&mut s, start as i32);

        s.push(self.level_type);
        s.push(0);
        push_u32(&mut s, self.level_value);
        s.push(255);
        s.push(0xFF);
        push_u32(&mut s, 0xFFFF_FFFF);

        if let Some(percentile) = self.percentile {
            s.push(percentile);
        }

        if let Some(interval) = self.interval {
            let end = self.reference_time + Duration::hours(self.forecast_hour as i64);
            push_timestamp(&mut s, end);
            s.push(1);
            push_u32(&mut s, 0);
            s.push(interval.process);
            s.push(2);
            s.push(1);
            push_u32(&mut s, interval.hours);
            s.push(1);
            push_u32(&mut s, 0);
        }

        let len = s.len() as u32;
        s[0..4].copy_from_slice(&len.to_be_bytes());
        s
    }

    /// Simple packing with E = 0: `X = round(v * 10^D) - R`.
    fn pack(&self, values: &[f32]) -> (Vec<u8>, Vec<u8>) {
        let scale = 10f64.powi(self.decimal_scale as i32);
        let scaled: Vec<i64> = values
            .iter()
            .map(|v| (*v as f64 * scale).round() as i64)
            .collect();
        let reference = scaled.iter().copied().min().unwrap_or(0);
        let max_offset = scaled.iter().map(|v| v - reference).max().unwrap_or(0) as u64;
        let bits = (64 - max_offset.leading_zeros()) as u8;

        let mut s = Vec::with_capacity(21);
        push_u32(&mut s, 21);
        s.push(5);
        push_u32(&mut s, values.len() as u32);
        push_u16(&mut s, 0);
        s.extend_from_slice(&(reference as f32).to_be_bytes());
        push_i16(&mut s, 0);
        push_i16(&mut s, self.decimal_scale);
        s.push(bits);
        s.push(0);

        let mut writer = BitWriter::default();
        if bits > 0 {
            for v in &scaled {
                writer.write((v - reference) as u64, bits as usize);
            }
        }
        (s, writer.finish())
    }
}

fn bitmap_section(data: &[f32]) -> Vec<u8> {
    let mut s = Vec::new();
    if data.iter().any(|v| v.is_nan()) {
        let mut writer = BitWriter::default();
        for v in data {
            writer.write(u64::from(!v.is_nan()), 1);
        }
        let map = writer.finish();
        push_u32(&mut s, (6 + map.len()) as u32);
        s.push(6);
        s.push(0);
        s.extend(map);
    } else {
        push_u32(&mut s, 6);
        s.push(6);
        s.push(255);
    }
    s
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    used: usize,
}

impl BitWriter {
    fn write(&mut self, value: u64, bits: usize) {
        for i in (0..bits).rev() {
            if self.used % 8 == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            if let Some(last) = self.bytes.last_mut() {
                *last |= bit << (7 - self.used % 8);
            }
            self.used += 1;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

fn micro(degrees: f64) -> i32 {
    (degrees * 1e6).round() as i32
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn push_i16(buf: &mut Vec<u8>, v: i16) {
    let magnitude = v.unsigned_abs() & 0x7FFF;
    push_u16(buf, if v < 0 { magnitude | 0x8000 } else { magnitude });
}

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    let magnitude = v.unsigned_abs() & 0x7FFF_FFFF;
    push_u32(buf, if v < 0 { magnitude | 0x8000_0000 } else { magnitude });
}

fn push_timestamp(buf: &mut Vec<u8>, t: DateTime<Utc>) {
    push_u16(buf, t.year() as u16);
    buf.push(t.month() as u8);
    buf.push(t.day() as u8);
    buf.push(t.hour() as u8);
    buf.push(t.minute() as u8);
    buf.push(t.second() as u8);
}
