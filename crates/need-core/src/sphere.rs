//! Great-circle distance on the Earth sphere.

use crate::coords::LatLon;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two geographic points.
///
/// Invalid positions (non-finite or out of range) yield `NaN`, which the
/// matcher treats as infinitely far.
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    if !a.is_valid() || !b.is_valid() {
        return f64::NAN;
    }
    let (lat1, lon1) = a.to_radians();
    let (lat2, lon2) = b.to_radians();
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.min(1.0).sqrt().asin()
}

/// Haversine distance using precomputed radians and latitude cosines.
/// Hot path for the distance engine; callers guarantee valid inputs.
#[inline]
pub(crate) fn haversine_rad(
    lat1: f64,
    lon1: f64,
    cos_lat1: f64,
    lat2: f64,
    lon2: f64,
    cos_lat2: f64,
) -> f64 {
    let dlat = ((lat2 - lat1) / 2.0).sin();
    let dlon = ((lon2 - lon1) / 2.0).sin();
    let h = dlat * dlat + cos_lat1 * cos_lat2 * dlon * dlon;
    2.0 * EARTH_RADIUS_KM * h.min(1.0).sqrt().asin()
}
