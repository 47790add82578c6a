//! GRIB2 parameter and level lookup tables.
//!
//! Translates numeric (discipline, category, number) codes into the short
//! names that appear in side-car index files, so decoded fields can be
//! matched by the same names used to select them.

use std::collections::HashMap;

/// Lookup key for parameter: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// GRIB2 parameter lookup table.
#[derive(Debug, Clone, Default)]
pub struct Grib2Tables {
    parameters: HashMap<ParamKey, String>,
}

impl Grib2Tables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// WMO and NCEP local parameters found in NBM, HRRR and URMA files.
    pub fn ncep() -> Self {
        let mut tables = Self::new();
        let entries: &[(ParamKey, &str)] = &[
            // Category 0: Temperature
            ((0, 0, 0), "TMP"),
            ((0, 0, 4), "TMAX"),
            ((0, 0, 5), "TMIN"),
            ((0, 0, 6), "DPT"),
            // Category 1: Moisture
            ((0, 1, 1), "RH"),
            ((0, 1, 7), "PRATE"),
            ((0, 1, 8), "APCP"),
            ((0, 1, 11), "SNOD"),
            ((0, 1, 29), "ASNOW"),
            // Category 2: Momentum
            ((0, 2, 0), "WDIR"),
            ((0, 2, 1), "WIND"),
            ((0, 2, 2), "UGRD"),
            ((0, 2, 3), "VGRD"),
            ((0, 2, 22), "GUST"),
            // Category 3: Mass
            ((0, 3, 0), "PRES"),
            ((0, 3, 1), "PRMSL"),
            // Category 6: Cloud
            ((0, 6, 1), "TCDC"),
            // Category 19: Physical atmospheric properties
            ((0, 19, 0), "VIS"),
        ];
        for ((discipline, category, number), name) in entries {
            tables.add_parameter(*discipline, *category, *number, name.to_string());
        }
        tables
    }

    /// Add or replace a parameter mapping
    pub fn add_parameter(&mut self, discipline: u8, category: u8, number: u8, name: String) {
        self.parameters.insert((discipline, category, number), name);
    }

    /// Look up parameter short name by GRIB2 codes.
    ///
    /// Returns "P{discipline}_{category}_{number}" if not found.
    pub fn parameter_name(&self, discipline: u8, category: u8, number: u8) -> String {
        self.parameters
            .get(&(discipline, category, number))
            .cloned()
            .unwrap_or_else(|| format!("P{}_{}_{}", discipline, category, number))
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

/// Human-readable level description in index-file style.
pub fn level_description(level_type: u8, level_value: Option<f64>) -> String {
    let value = level_value.unwrap_or(0.0);
    match level_type {
        1 => "surface".to_string(),
        100 => format!("{} mb", value / 100.0),
        101 => "mean sea level".to_string(),
        102 => format!("{} m above mean sea level", value),
        103 => format!("{} m above ground", value),
        200 => "entire atmosphere".to_string(),
        other => format!("level type {} value {}", other, value),
    }
}
