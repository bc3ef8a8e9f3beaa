//! Conversions between angular coordinates and unit-sphere positions.
//!
//! Convention: latitude 0 / longitude 0 maps to +X, longitude 90 maps to +Z,
//! and the north pole is +Y. Sky positions use declination as latitude and
//! right ascension (in degrees) as longitude.

use std::f64::consts::PI;

use glam::DVec3;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Unit vector for a latitude/longitude pair given in degrees.
#[must_use]
pub fn lat_lng_to_vector(lat_deg: f64, lng_deg: f64) -> DVec3 {
    let lat = lat_deg.to_radians();
    let lng = lng_deg.to_radians();
    DVec3::new(lat.cos() * lng.cos(), lat.sin(), lat.cos() * lng.sin())
}

/// Unit vector for a sky position given as right ascension and declination in degrees.
#[must_use]
pub fn ra_dec_to_vector(ra_deg: f64, dec_deg: f64) -> DVec3 {
    lat_lng_to_vector(dec_deg, ra_deg)
}

/// Latitude and longitude (degrees) of a direction. The vector need not be normalized.
///
/// Longitude is in `(-180, 180]`. The zero vector maps to `(0, 0)`.
#[must_use]
pub fn vector_to_lat_lng(v: DVec3) -> (f64, f64) {
    let n = v.normalize_or_zero();
    if n == DVec3::ZERO {
        return (0.0, 0.0);
    }
    let lat = n.y.clamp(-1.0, 1.0).asin().to_degrees();
    let lng = n.z.atan2(n.x).to_degrees();
    (lat, lng)
}

/// Midpoint of the great-circle arc between two unit vectors.
///
/// The planar average is pushed back onto the unit sphere. For (nearly)
/// antipodal inputs the arc is undefined and `a` is returned.
#[must_use]
pub fn geodesic_midpoint(a: DVec3, b: DVec3) -> DVec3 {
    let mid = (a + b) * 0.5;
    if mid.length_squared() < 1e-24 {
        return a;
    }
    mid.normalize()
}

/// Latitude (degrees) at a fractional Mercator row, where 0 is the top of the
/// world and 1 the bottom.
#[must_use]
pub fn mercator_lat(y_fraction: f64) -> f64 {
    (PI * (1.0 - 2.0 * y_fraction)).sinh().atan().to_degrees()
}

/// Fractional Mercator row for a latitude in degrees. Inverse of [`mercator_lat`].
#[must_use]
pub fn mercator_y(lat_deg: f64) -> f64 {
    let lat = lat_deg.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) * 0.5
}

/// Orthonormal frame tangent to the sphere at a reference point, used for
/// gnomonic (tangent-plane) projections.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TangentFrame {
    /// The tangent point.
    pub center: DVec3,
    /// Plane +x axis (east before rotation).
    pub x_axis: DVec3,
    /// Plane +y axis (north before rotation).
    pub y_axis: DVec3,
}

impl TangentFrame {
    /// Build a frame at `(lat, lng)` whose plane axes are rotated
    /// counter-clockwise by `rotation_deg` about the tangent point.
    #[must_use]
    pub fn new(lat_deg: f64, lng_deg: f64, rotation_deg: f64) -> Self {
        let lat = lat_deg.to_radians();
        let lng = lng_deg.to_radians();
        let center = lat_lng_to_vector(lat_deg, lng_deg);
        let east = DVec3::new(-lng.sin(), 0.0, lng.cos());
        let north = DVec3::new(-lat.sin() * lng.cos(), lat.cos(), -lat.sin() * lng.sin());

        let (s, c) = rotation_deg.to_radians().sin_cos();
        Self {
            center,
            x_axis: east * c + north * s,
            y_axis: north * c - east * s,
        }
    }

    /// Project plane coordinates (in degrees of arc at the tangent point) back
    /// onto the unit sphere.
    #[must_use]
    pub fn plane_to_sphere(&self, x_deg: f64, y_deg: f64) -> DVec3 {
        let p = self.center
            + self.x_axis * x_deg.to_radians().tan()
            + self.y_axis * y_deg.to_radians().tan();
        p.normalize()
    }
}
