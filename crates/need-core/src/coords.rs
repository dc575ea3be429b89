/// Geographic coordinate types for facilities and survey clusters.
/// All coordinate math uses f64 for precision.

/// A point on the sphere in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a position from two optional coordinates.
    /// Returns `None` unless both are present.
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Self { lat, lon }),
            _ => None,
        }
    }

    /// Finite and inside the geographic range.
    pub fn is_valid(self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Convert to radians.
    pub fn to_radians(self) -> (f64, f64) {
        (self.lat.to_radians(), self.lon.to_radians())
    }
}

/// Coerce a raw table cell to a number. Empty, unparsable and non-finite
/// text all become `None`.
pub fn coerce_f64(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_bounds() {
        assert!(LatLon::new(90.0, 180.0).is_valid());
        assert!(LatLon::new(-90.0, -180.0).is_valid());
        assert!(!LatLon::new(90.5, 0.0).is_valid());
        assert!(!LatLon::new(0.0, -181.0).is_valid());
        assert!(!LatLon::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn from_parts_requires_both() {
        assert_eq!(LatLon::from_parts(Some(1.0), Some(2.0)), Some(LatLon::new(1.0, 2.0)));
        assert!(LatLon::from_parts(None, Some(2.0)).is_none());
        assert!(LatLon::from_parts(Some(1.0), None).is_none());
    }

    #[test]
    fn coerce_handles_junk() {
        assert_eq!(coerce_f64(" 6.52 "), Some(6.52));
        assert_eq!(coerce_f64("-3"), Some(-3.0));
        assert_eq!(coerce_f64(""), None);
        assert_eq!(coerce_f64("n/a"), None);
        assert_eq!(coerce_f64("NaN"), None);
        assert_eq!(coerce_f64("inf"), None);
    }
}
