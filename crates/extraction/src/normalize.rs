//! Unit conversion, renaming and rounding of extracted values.

/// Conversion from a GRIB2 native unit to an archive unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Identity,
    KelvinToFahrenheit,
    MetersPerSecondToKnots,
    MillimetersToInches,
    MetersToInches,
}

const KNOTS_PER_MS: f64 = 1.94384;
const INCHES_PER_MM: f64 = 0.0393701;
const INCHES_PER_M: f64 = 39.3701;

impl Conversion {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Conversion::Identity => value,
            // Archived temperatures use a 273 K freezing point
            Conversion::KelvinToFahrenheit => 1.8 * (value - 273.0) + 32.0,
            Conversion::MetersPerSecondToKnots => value * KNOTS_PER_MS,
            Conversion::MillimetersToInches => value * INCHES_PER_MM,
            Conversion::MetersToInches => value * INCHES_PER_M,
        }
    }
}

/// Maps one decoded field to one archive column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    /// Parameter short name as decoded, e.g. "WIND"
    pub source: &'static str,
    /// Archive column name, e.g. "wind_speed_kt"
    pub output: &'static str,
    pub conversion: Conversion,
}

impl FieldRule {
    pub const fn new(source: &'static str, output: &'static str, conversion: Conversion) -> Self {
        Self {
            source,
            output,
            conversion,
        }
    }

    /// Converted and rounded value; `None` for missing input.
    pub fn normalize(&self, raw: f64) -> Option<f64> {
        normalize_value(self.output, self.conversion, raw)
    }
}

/// Decimal places kept for an archive column.
///
/// Directions are whole degrees, snow is tenths of an inch, everything else
/// is kept to hundredths.
pub fn precision_for(column: &str) -> u32 {
    if column.contains("deg") {
        0
    } else if column.starts_with("snow") {
        1
    } else {
        2
    }
}

/// Round half away from zero to `digits` decimal places.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Convert then round for `column`; NaN input yields `None`.
pub fn normalize_value(column: &str, conversion: Conversion, raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    Some(round_to(conversion.apply(raw), precision_for(column)))
}

/// Wind speed (knots) and meteorological direction (degrees) from
/// grid-relative u/v components in m/s.
pub fn wind_from_components(u: f64, v: f64) -> (f64, f64) {
    let speed = Conversion::MetersPerSecondToKnots.apply((u * u + v * v).sqrt());
    let direction = (270.0 - v.atan2(u).to_degrees()).rem_euclid(360.0);
    (speed, direction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freezing_point_kelvin_to_fahrenheit() {
        let f = Conversion::KelvinToFahrenheit.apply(273.0);
        assert!((f - 32.0).abs() < 0.1);
    }

    #[test]
    fn test_millimeters_to_inches() {
        let inches = Conversion::MillimetersToInches.apply(25.4);
        assert!((inches - 1.0).abs() < 1e-4);
        assert_eq!(round_to(inches, 2), 1.0);
    }

    #[test]
    fn test_meters_to_inches_and_knots() {
        assert!((Conversion::MetersToInches.apply(0.0254) - 1.0).abs() < 1e-4);
        assert!((Conversion::MetersPerSecondToKnots.apply(10.0) - 19.4384).abs() < 1e-9);
        assert_eq!(Conversion::Identity.apply(42.5), 42.5);
    }

    #[test]
    fn test_precision_by_column() {
        assert_eq!(precision_for("wind_dir_deg"), 0);
        assert_eq!(precision_for("snow_p50"), 1);
        assert_eq!(precision_for("snow_accum"), 1);
        assert_eq!(precision_for("qpf_p90"), 2);
        assert_eq!(precision_for("max_temp"), 2);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.25, 1), 1.3);
        assert_eq!(round_to(-2.5, 0), -3.0);
        assert_eq!(round_to(359.6, 0), 360.0);
    }

    #[test]
    fn test_normalize_skips_missing() {
        let rule = FieldRule::new("WDIR", "wind_dir_deg", Conversion::Identity);
        assert_eq!(rule.normalize(f64::NAN), None);
        assert_eq!(rule.normalize(212.6), Some(213.0));
    }

    #[test]
    fn test_wind_from_components() {
        // Westerly wind: blowing from 270 towards the east
        let (speed, dir) = wind_from_components(10.0, 0.0);
        assert!((speed - 19.4384).abs() < 1e-6);
        assert!((dir - 270.0).abs() < 1e-9);

        // Southerly wind: from 180
        let (_, dir) = wind_from_components(0.0, 5.0);
        assert!((dir - 180.0).abs() < 1e-9);

        // Northerly wind: from 360 maps to 0
        let (_, dir) = wind_from_components(0.0, -5.0);
        assert!(dir.abs() < 1e-9 || (dir - 360.0).abs() < 1e-9);
    }
}
