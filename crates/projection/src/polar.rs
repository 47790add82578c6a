//! North polar stereographic projection (GRIB2 grid template 3.20).
//!
//! The Alaska NBM and URMA grids use this projection with the scale true at
//! LaD (60N) and the grid oriented along LoV.

use std::f64::consts::PI;

use crate::wrap_radians;

/// Spherical north polar stereographic projection anchored at a grid's first point.
#[derive(Debug, Clone)]
pub struct PolarStereographic {
    /// Orientation longitude (LoV) in radians
    lov: f64,
    dx: f64,
    dy: f64,
    /// `R * (1 + sin(LaD))`
    scale: f64,
    x0: f64,
    y0: f64,
}

impl PolarStereographic {
    /// Create a projection from GRIB2 template 3.20 parameters (degrees and meters).
    #[allow(clippy::too_many_arguments)]
    pub fn from_grib2(
        lat1_deg: f64,
        lon1_deg: f64,
        lov_deg: f64,
        lad_deg: f64,
        dx: f64,
        dy: f64,
        earth_radius: f64,
    ) -> Self {
        let to_rad = PI / 180.0;
        let lov = lov_deg * to_rad;
        let scale = earth_radius * (1.0 + (lad_deg * to_rad).sin());

        let mut proj = Self {
            lov,
            dx,
            dy,
            scale,
            x0: 0.0,
            y0: 0.0,
        };
        let (x0, y0) = proj.project(lat1_deg * to_rad, lon1_deg * to_rad);
        proj.x0 = x0;
        proj.y0 = y0;
        proj
    }

    fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let rho = self.scale * (PI / 4.0 - lat / 2.0).tan();
        let dlon = wrap_radians(lon - self.lov);
        (rho * dlon.sin(), -rho * dlon.cos())
    }

    /// Geographic coordinates (degrees) to fractional grid indices `(i, j)`.
    pub fn geo_to_grid(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let (x, y) = self.project(lat_deg * to_rad, lon_deg * to_rad);
        ((x - self.x0) / self.dx, (y - self.y0) / self.dy)
    }

    /// Grid indices `(i, j)` to geographic coordinates `(lat, lon)` in degrees.
    pub fn grid_to_geo(&self, i: f64, j: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;

        let x = self.x0 + i * self.dx;
        let y = self.y0 + j * self.dy;
        let rho = (x * x + y * y).sqrt();

        let lat = PI / 2.0 - 2.0 * (rho / self.scale).atan();
        let lon = self.lov + x.atan2(-y);

        (lat * to_deg, lon * to_deg)
    }
}
