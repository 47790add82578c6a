//! Shared fixtures: stations, run times and grids used across crates.

use archive_common::StationLocation;
use chrono::{DateTime, TimeZone, Utc};

use crate::grib2::LatLonGrid;

/// Alaska stations used throughout the tests.
pub mod stations {
    /// (id, name, lat, lon, elevation ft)
    pub const PAJN: (&str, &str, f64, f64, f64) = ("PAJN", "Juneau International Airport", 58.3547, -134.5763, 21.0);
    pub const PAFA: (&str, &str, f64, f64, f64) = ("PAFA", "Fairbanks International Airport", 64.8039, -147.8761, 434.0);
    pub const PANC: (&str, &str, f64, f64, f64) = ("PANC", "Anchorage Ted Stevens", 61.1689, -150.0278, 131.0);
}

pub fn station(fixture: (&str, &str, f64, f64, f64)) -> StationLocation {
    let (id, name, lat, lon, elevation) = fixture;
    let mut station = StationLocation::new(id, lat, lon);
    station.name = Some(name.to_string());
    station.elevation = Some(elevation);
    station
}

/// PAJN, PAFA and PANC.
pub fn alaska_stations() -> Vec<StationLocation> {
    vec![
        station(stations::PAJN),
        station(stations::PAFA),
        station(stations::PANC),
    ]
}

/// 2024-01-15 12Z, the default run time of synthetic files.
pub fn init_time() -> DateTime<Utc> {
    utc(2024, 1, 15, 12)
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Quarter-degree grid covering southern and interior Alaska,
/// 70N..55N and 170W..130W, scanned north to south.
pub fn alaska_quarter_degree() -> LatLonGrid {
    LatLonGrid::north_to_south(161, 61, 70.0, 190.0, 0.25)
}
