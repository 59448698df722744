//! Flat-earth local tangent plane.
//!
//! Good to a few metres within ~10 km of the reference point, which covers
//! one RSU's coverage area.

use serde::{Deserialize, Serialize};

/// Metres per degree of longitude at the equator.
pub const METRES_PER_DEG_LON_EQUATOR: f64 = 111_320.0;

/// Metres per degree of latitude.
pub const METRES_PER_DEG_LAT: f64 = 110_540.0;

/// Projection of (lat, lon) onto local (x east, y north) metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalTangentPlane {
    pub ref_lat: f64,
    pub ref_lon: f64,
}

impl Default for LocalTangentPlane {
    fn default() -> Self {
        // New Delhi deployment reference
        Self::new(28.6139, 77.2090)
    }
}

impl LocalTangentPlane {
    pub fn new(ref_lat: f64, ref_lon: f64) -> Self {
        Self { ref_lat, ref_lon }
    }

    fn metres_per_deg_lon(&self) -> f64 {
        METRES_PER_DEG_LON_EQUATOR * self.ref_lat.to_radians().cos()
    }

    /// (lat, lon) → (x, y) metres from the reference point.
    pub fn to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.ref_lon) * self.metres_per_deg_lon();
        let y = (lat - self.ref_lat) * METRES_PER_DEG_LAT;
        (x, y)
    }

    /// (x, y) metres → (lat, lon). Inverse of [`Self::to_local`].
    pub fn to_latlon(&self, x: f64, y: f64) -> (f64, f64) {
        let lat = self.ref_lat + y / METRES_PER_DEG_LAT;
        let lon = self.ref_lon + x / self.metres_per_deg_lon();
        (lat, lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_maps_to_origin() {
        let ltp = LocalTangentPlane::default();
        let (x, y) = ltp.to_local(28.6139, 77.2090);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 0.0);
    }

    #[test]
    fn test_one_milli_degree_north() {
        let ltp = LocalTangentPlane::default();
        let (x, y) = ltp.to_local(28.6149, 77.2090);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 110.54, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_recovers_latlon() {
        let ltp = LocalTangentPlane::default();
        let (lat, lon) = ltp.to_latlon(-340.0, 1250.0);
        let (x, y) = ltp.to_local(lat, lon);
        assert_relative_eq!(x, -340.0, epsilon = 1e-6);
        assert_relative_eq!(y, 1250.0, epsilon = 1e-6);
    }
}
