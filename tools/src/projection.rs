//! Conversion of WGS84 coordinates into the plane used for storage (spherical Web Mercator,
//! EPSG:3857) and geohash computation.
//!
//! Both outputs are computed from the original WGS84 input: the geohash is never derived from a
//! projected (then reprojected) value.

use std::f64::consts::PI;

use geo::Point;
use geohash::Coord;

/// Radius of the sphere used by Web Mercator, in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Upper bound of the projected X (and Y) coordinate, `-MAX_X` being the lower one.
pub const MAX_X: f64 = PI * EARTH_RADIUS;

/// Latitude at which Web Mercator becomes a square, coordinates beyond it can't be stored.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Length of the geohash strings stored alongside houses (a cell of a few centimeters).
pub const GEOHASH_PRECISION: usize = 12;

/// SRID of the storage plane.
pub const STORAGE_SRID: u32 = 3857;

/// A coordinate projected in the storage plane together with the geohash of its WGS84 source.
#[derive(Clone, Debug, PartialEq)]
pub struct Located {
    pub location: Point<f64>,
    pub geohash: String,
}

/// Projects a WGS84 coordinate into the storage plane.
///
/// Returns `None` if the input is not finite or if the latitude is outside of the range Web
/// Mercator can represent. Longitudes are not checked: values outside of `[-180, 180]` project
/// outside of `[-MAX_X, MAX_X]` and are rejected when choosing a partition.
///
/// # Example
/// ```
/// use tools::projection::{project, MAX_X};
///
/// let origin = project(0., 0.).unwrap();
/// assert_eq!((origin.x(), origin.y()), (0., 0.));
/// assert!((project(180., 0.).unwrap().x() - MAX_X).abs() < 1e-6);
/// assert!(project(0., 89.).is_none());
/// ```
pub fn project(lon: f64, lat: f64) -> Option<Point<f64>> {
    if !lon.is_finite() || !lat.is_finite() || lat.abs() > MAX_LATITUDE {
        return None;
    }

    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * lat.to_radians().tan().asinh();
    Some(Point::new(x, y))
}

/// Converts a point of the storage plane back into a WGS84 `(lon, lat)` pair.
pub fn unproject(point: Point<f64>) -> (f64, f64) {
    let lon = (point.x() / EARTH_RADIUS).to_degrees();
    let lat = (point.y() / EARTH_RADIUS).sinh().atan().to_degrees();
    (lon, lat)
}

/// Computes the geohash of a WGS84 coordinate at `GEOHASH_PRECISION`.
///
/// # Example
/// ```
/// use tools::projection::geohash;
///
/// assert!(geohash(-5.6, 42.6).unwrap().starts_with("ezs42"));
/// assert!(geohash(181., 0.).is_none());
/// ```
pub fn geohash(lon: f64, lat: f64) -> Option<String> {
    geohash::encode(Coord { x: lon, y: lat }, GEOHASH_PRECISION).ok()
}

/// Projects a WGS84 coordinate and computes its geohash, `None` if either can't be computed.
pub fn locate(lon: f64, lat: f64) -> Option<Located> {
    Some(Located {
        location: project(lon, lat)?,
        geohash: geohash(lon, lat)?,
    })
}
