use nav_types::{NED, WGS84};
use serde::Deserialize;

/// A geodetic point on the WGS-84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Geodetic {
    pub fn new(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            alt_m,
        }
    }
}

/// Converts a geodetic point to a local tangent-plane NED offset (meters,
/// down-positive) from `origin`.
///
/// Both the live relative-position query and mission conversion go through
/// this function so their results are directly comparable.
pub fn geodetic_to_ned(point: Geodetic, origin: Geodetic) -> (f64, f64, f64) {
    let point = WGS84::from_degrees_and_meters(point.lat_deg, point.lon_deg, point.alt_m);
    let origin = WGS84::from_degrees_and_meters(origin.lat_deg, origin.lon_deg, origin.alt_m);

    let enu = point - origin;
    let ned = NED::new(enu.north(), enu.east(), -enu.up());
    (ned.north(), ned.east(), ned.down())
}

#[cfg(test)]
mod tests {
    use super::*;

    // meridian arc length per degree of latitude near 47°N
    const METERS_PER_DEG_LAT: f64 = 111_132.0;

    #[test]
    fn point_relative_to_itself_is_zero() {
        let p = Geodetic::new(47.3977, 8.5456, 488.0);
        let (n, e, d) = geodetic_to_ned(p, p);
        assert!(n.abs() < 1e-6);
        assert!(e.abs() < 1e-6);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn origin_north_of_point_gives_negative_north() {
        let point = Geodetic::new(47.0, 8.5, 500.0);
        let origin = Geodetic::new(47.0 + 100.0 / METERS_PER_DEG_LAT, 8.5, 450.0);

        let (n, e, d) = geodetic_to_ned(point, origin);
        assert!((n + 100.0).abs() < 0.5, "north was {n}");
        assert!(e.abs() < 0.5, "east was {e}");
        // point is 50 m above origin, down is positive towards the ground
        assert!((d + 50.0).abs() < 0.5, "down was {d}");
    }

    #[test]
    fn altitude_only_offset_maps_to_down() {
        let origin = Geodetic::new(-35.363, 149.165, 600.0);
        let point = Geodetic::new(-35.363, 149.165, 630.0);

        let (n, e, d) = geodetic_to_ned(point, origin);
        assert!(n.abs() < 1e-3);
        assert!(e.abs() < 1e-3);
        assert!((d + 30.0).abs() < 1e-3);
    }
}
