//! Map projections used by forecast grids.
//!
//! Implements the forward and inverse transforms needed to recover the
//! latitude/longitude of every grid point from a GRIB2 grid definition.

pub mod lambert;
pub mod polar;

pub use lambert::LambertConformal;
pub use polar::PolarStereographic;

/// Spherical earth radius used when the grid does not specify one (GRIB2 shape 6).
pub const EARTH_RADIUS_M: f64 = 6_371_229.0;

/// Wrap a longitude into `[-180, 180)`.
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Wrap a longitude difference in radians into `[-PI, PI]`.
pub(crate) fn wrap_radians(mut dlon: f64) -> f64 {
    use std::f64::consts::PI;
    while dlon > PI {
        dlon -= 2.0 * PI;
    }
    while dlon < -PI {
        dlon += 2.0 * PI;
    }
    dlon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(0.0), 0.0);
        assert_eq!(normalize_longitude(210.0), -150.0);
        assert_eq!(normalize_longitude(180.0), -180.0);
        assert_eq!(normalize_longitude(-180.0), -180.0);
        assert_eq!(normalize_longitude(359.75), -0.25);
        assert!((normalize_longitude(-540.5) - 179.5).abs() < 1e-9);
    }
}
