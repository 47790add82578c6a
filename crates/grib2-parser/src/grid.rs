//! Latitude/longitude of every grid point.
//!
//! Coordinates are produced in the same scan order as unpacked values, so
//! `values[k]` lies at `(lats[k], lons[k])`. The flat index maps to a
//! `(row, col)` view with `cols` points per row.

use projection::{normalize_longitude, LambertConformal, PolarStereographic};

use crate::sections::{GridDefinition, GridGeometry};
use crate::{Grib2Error, Grib2Result};

/// Scanning mode flag bits (code table 3.4)
const SCAN_I_NEGATIVE: u8 = 0x80;
const SCAN_J_POSITIVE: u8 = 0x40;
const SCAN_J_CONSECUTIVE: u8 = 0x20;
const SCAN_BOUSTROPHEDON: u8 = 0x10;

/// Coordinates of a decoded grid, longitudes in `[-180, 180)`.
#[derive(Debug, Clone)]
pub struct GridCoordinates {
    pub rows: usize,
    pub cols: usize,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
}

impl GridCoordinates {
    pub fn len(&self) -> usize {
        self.lats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lats.is_empty()
    }

    /// Flat scan-order index to `(row, col)`.
    pub fn row_col(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    /// `(row, col)` to flat scan-order index.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }
}

impl GridDefinition {
    /// Compute the coordinates of every point of the grid.
    pub fn coordinates(&self) -> Grib2Result<GridCoordinates> {
        let ni = self.ni as usize;
        let nj = self.nj as usize;
        if ni == 0 || nj == 0 || ni * nj != self.num_points as usize {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: format!(
                    "grid {}x{} does not match {} data points",
                    ni, nj, self.num_points
                ),
            });
        }

        let radius = self.earth_radius();
        let micro = |v: i32| v as f64 * 1e-6;
        let milli = |v: u32| v as f64 * 1e-3;

        // Position of a point relative to the first grid point, in grid steps
        let locate: Box<dyn Fn(f64, f64) -> (f64, f64)> = match &self.geometry {
            GridGeometry::LatLon { la1, lo1, di, dj, .. } => {
                let (la1, lo1) = (micro(*la1), micro(*lo1));
                let (di, dj) = (micro(*di as i32), micro(*dj as i32));
                Box::new(move |i, j| (la1 + j * dj, lo1 + i * di))
            }
            GridGeometry::PolarStereographic {
                la1,
                lo1,
                lad,
                lov,
                dx,
                dy,
                projection_centre,
            } => {
                if projection_centre & 0x80 != 0 {
                    return Err(Grib2Error::UnsupportedTemplate {
                        section: 3,
                        template: self.template,
                    });
                }
                let proj = PolarStereographic::from_grib2(
                    micro(*la1),
                    micro(*lo1),
                    micro(*lov),
                    micro(*lad),
                    milli(*dx),
                    milli(*dy),
                    radius,
                );
                Box::new(move |i, j| proj.grid_to_geo(i, j))
            }
            GridGeometry::LambertConformal {
                la1,
                lo1,
                lov,
                dx,
                dy,
                latin1,
                latin2,
                ..
            } => {
                let proj = LambertConformal::from_grib2(
                    micro(*la1),
                    micro(*lo1),
                    micro(*lov),
                    micro(*latin1),
                    micro(*latin2),
                    milli(*dx),
                    milli(*dy),
                    radius,
                );
                Box::new(move |i, j| proj.grid_to_geo(i, j))
            }
        };

        let mode = self.scanning_mode;
        let i_sign = if mode & SCAN_I_NEGATIVE != 0 { -1.0 } else { 1.0 };
        let j_sign = if mode & SCAN_J_POSITIVE != 0 { 1.0 } else { -1.0 };
        let j_consecutive = mode & SCAN_J_CONSECUTIVE != 0;
        let (rows, cols) = if j_consecutive { (ni, nj) } else { (nj, ni) };

        let mut lats = Vec::with_capacity(ni * nj);
        let mut lons = Vec::with_capacity(ni * nj);

        for row in 0..rows {
            for col in 0..cols {
                let col = if mode & SCAN_BOUSTROPHEDON != 0 && row % 2 == 1 {
                    cols - 1 - col
                } else {
                    col
                };
                let (i, j) = if j_consecutive { (row, col) } else { (col, row) };
                let (lat, lon) = locate(i_sign * i as f64, j_sign * j as f64);
                lats.push(lat);
                lons.push(normalize_longitude(lon));
            }
        }

        Ok(GridCoordinates {
            rows,
            cols,
            lats,
            lons,
        })
    }
}
