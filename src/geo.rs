//! Geographic primitives: coordinates, great-circle distance, bearings and
//! point-to-segment projection on the WGS-84 sphere approximation.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used throughout, in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point on the surface of the Earth, in degrees.
///
/// Equality is exact on the stored `f64` values, matching the data model's
/// "no epsilon" invariant; use [`Coordinate::haversine_distance`] for any
/// proximity comparison.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other`, in meters.
    pub fn haversine_distance(&self, other: &Coordinate) -> f64 {
        let theta1 = self.lat.to_radians();
        let theta2 = other.lat.to_radians();
        let delta_theta = (other.lat - self.lat).to_radians();
        let delta_lambda = (other.lon - self.lon).to_radians();

        let a = (delta_theta / 2.0).sin().powi(2)
            + theta1.cos() * theta2.cos() * (delta_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_M * c
    }

    /// Initial compass bearing from `self` to `other`, in degrees [0, 360).
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let y = delta_lon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();
        let theta = y.atan2(x).to_degrees();
        (theta + 360.0) % 360.0
    }

    /// `[lon, lat]`, the wire-format ordering used by GeoJSON and edge geometry.
    pub fn to_lon_lat(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// Relative bearing of the edge `u -> v`, measured against the bearing from
/// `u` to `reference` as 0 degrees. Result is in [0, 360).
pub fn relative_bearing(u: &Coordinate, v: &Coordinate, reference: &Coordinate) -> f64 {
    let bearing_u_v = u.bearing_to(v);
    let bearing_u_ref = u.bearing_to(reference);
    (bearing_u_v - bearing_u_ref + 360.0) % 360.0
}

/// Web Mercator projection, in meters East of Greenwich / North of the
/// Equator. Used only to build the planar spatial index over edge geometry;
/// all actual distance calculations go through [`Coordinate::haversine_distance`].
pub fn web_mercator_project(c: &Coordinate) -> [f64; 2] {
    const A: f64 = 6_378_137.0;
    let lat_rad = c.lat.to_radians();
    let lon_rad = c.lon.to_radians();
    let easting = A * lon_rad;
    let northing = A * (std::f64::consts::FRAC_PI_4 + lat_rad / 2.0).tan().ln();
    [easting, northing]
}

/// Projects `target` onto the segment `a`-`b`, clamped to the segment's
/// endpoints. Uses an equirectangular approximation valid for the short
/// distances a single street edge spans.
pub fn project_point_onto_segment(
    target: &Coordinate,
    a: &Coordinate,
    b: &Coordinate,
) -> Coordinate {
    let lat_ref = a.lat.to_radians();
    let to_xy = |c: &Coordinate| -> (f64, f64) {
        (
            (c.lon - a.lon).to_radians() * lat_ref.cos(),
            (c.lat - a.lat).to_radians(),
        )
    };
    let from_xy = |x: f64, y: f64| -> Coordinate {
        Coordinate::new(a.lat + y.to_degrees(), a.lon + (x / lat_ref.cos()).to_degrees())
    };

    let (ax, ay) = (0.0, 0.0);
    let (bx, by) = to_xy(b);
    let (px, py) = to_xy(target);

    let abx = bx - ax;
    let aby = by - ay;
    let len_sq = abx * abx + aby * aby;

    let t = if len_sq == 0.0 {
        0.0
    } else {
        ((px - ax) * abx + (py - ay) * aby) / len_sq
    }
    .clamp(0.0, 1.0);

    from_xy(ax + t * abx, ay + t * aby)
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_close(left: f64, right: f64, max_error: f64) {
        assert!((left - right).abs() < max_error, "{} ~ {}", left, right);
    }

    #[test]
    fn haversine_distance_symmetric_and_zero_on_equal() {
        let a = Coordinate::new(36.12, -86.67);
        let b = Coordinate::new(33.94, -118.4);

        assert_eq!(a.haversine_distance(&a), 0.0);
        assert_eq!(a.haversine_distance(&b), b.haversine_distance(&a));
        assert_close(a.haversine_distance(&b), 2_886_444.0, 1000.0);
    }

    #[test]
    fn bearing_north_is_zero() {
        let a = Coordinate::new(0.0, 0.0);
        let north = Coordinate::new(1.0, 0.0);
        assert_close(a.bearing_to(&north), 0.0, 1e-6);

        let east = Coordinate::new(0.0, 1.0);
        assert_close(a.bearing_to(&east), 90.0, 1e-6);
    }

    #[test]
    fn relative_bearing_is_zero_when_aimed_at_reference() {
        let u = Coordinate::new(0.0, 0.0);
        let v = Coordinate::new(1.0, 1.0);
        assert_close(relative_bearing(&u, &v, &v), 0.0, 1e-9);
    }

    #[test]
    fn relative_bearing_in_range() {
        let u = Coordinate::new(10.0, 10.0);
        let v = Coordinate::new(10.1, 9.8);
        let reference = Coordinate::new(9.8, 10.3);
        let angle = relative_bearing(&u, &v, &reference);
        assert!((0.0..360.0).contains(&angle));
    }

    #[test]
    fn projection_clamps_to_segment() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);

        // Target far past `b` clamps to `b`.
        let target = Coordinate::new(0.0, 2.0);
        let projected = project_point_onto_segment(&target, &a, &b);
        assert_close(projected.lon, b.lon, 1e-6);

        // Target above the midpoint projects onto the midpoint.
        let target_mid = Coordinate::new(0.01, 0.5);
        let projected_mid = project_point_onto_segment(&target_mid, &a, &b);
        assert_close(projected_mid.lon, 0.5, 1e-3);
        assert_close(projected_mid.lat, 0.0, 1e-6);
    }
}
