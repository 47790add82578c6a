//! Lambert Conformal Conic projection (GRIB2 grid template 3.30).
//!
//! Used by HRRR and the CONUS/Alaska NBM grids. The grid origin is the first
//! grid point (La1, Lo1); `i` increases eastward by `dx` and `j` northward by
//! `dy`, both in meters.

use std::f64::consts::PI;

use crate::wrap_radians;

/// Lambert Conformal Conic projection anchored at a grid's first point.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    /// Central meridian (LoV) in radians
    lon0: f64,
    /// Grid spacing in X direction (meters)
    dx: f64,
    /// Grid spacing in Y direction (meters)
    dy: f64,
    earth_radius: f64,
    /// Cone constant (n)
    n: f64,
    /// F constant
    f: f64,
    /// Rho at the first grid point; the projection's false origin
    rho0: f64,
    /// First grid point in projection coordinates
    x0: f64,
    y0: f64,
}

impl LambertConformal {
    /// Create a projection from GRIB2 template 3.30 parameters (degrees and meters).
    #[allow(clippy::too_many_arguments)]
    pub fn from_grib2(
        lat1_deg: f64,
        lon1_deg: f64,
        lov_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        dx: f64,
        dy: f64,
        earth_radius: f64,
    ) -> Self {
        let to_rad = PI / 180.0;

        let lat1 = lat1_deg * to_rad;
        let lon1 = lon1_deg * to_rad;
        let lon0 = lov_deg * to_rad;
        let latin1 = latin1_deg * to_rad;
        let latin2 = latin2_deg * to_rad;

        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone
            latin1.sin()
        } else {
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = (latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n)) / n;
        let rho0 = earth_radius * f / (PI / 4.0 + lat1 / 2.0).tan().powf(n);

        let theta0 = n * wrap_radians(lon1 - lon0);
        let x0 = rho0 * theta0.sin();
        let y0 = rho0 - rho0 * theta0.cos();

        Self {
            lon0,
            dx,
            dy,
            earth_radius,
            n,
            f,
            rho0,
            x0,
            y0,
        }
    }

    /// Geographic coordinates (degrees) to fractional grid indices `(i, j)`.
    pub fn geo_to_grid(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let lat = lat_deg * to_rad;
        let dlon = wrap_radians(lon_deg * to_rad - self.lon0);

        let rho = self.earth_radius * self.f / (PI / 4.0 + lat / 2.0).tan().powf(self.n);
        let theta = self.n * dlon;

        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();

        ((x - self.x0) / self.dx, (y - self.y0) / self.dy)
    }

    /// Grid indices `(i, j)` to geographic coordinates `(lat, lon)` in degrees.
    pub fn grid_to_geo(&self, i: f64, j: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;

        let x = self.x0 + i * self.dx;
        let y = self.y0 + j * self.dy;

        let mut rho = (x * x + (self.rho0 - y) * (self.rho0 - y)).sqrt();
        if self.n < 0.0 {
            rho = -rho;
        }
        let theta = (x / (self.rho0 - y)).atan();

        let lat = 2.0 * ((self.earth_radius * self.f / rho).powf(1.0 / self.n)).atan() - PI / 2.0;
        let lon = self.lon0 + theta / self.n;

        (lat * to_deg, lon * to_deg)
    }
}
