//! Geodesy helpers: distances, envelopes, and polygon areas
//!
//! All coordinates are WGS84 decimal degrees. Distances use the haversine
//! formula, which is comfortably accurate at the facility-matching scales
//! (tens to hundreds of meters) this service works with.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::model::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Rectangular lat/lon envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Netherlands sanity envelope for NL-scoped sources
pub const NETHERLANDS: BoundingBox = BoundingBox {
    min_lat: 50.7,
    min_lon: 3.3,
    max_lat: 53.6,
    max_lon: 7.2,
};

/// Whole-continent envelope for pan-European sources
pub const EUROPE: BoundingBox = BoundingBox {
    min_lat: 34.0,
    min_lon: -11.0,
    max_lat: 72.0,
    max_lon: 32.0,
};

impl BoundingBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Simple rectangular containment, bounds inclusive
    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }
}

/// Parses the map-client form `minLat,minLng,maxLat,maxLng`
impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected 4 comma-separated values, got {}", parts.len()));
        }
        let mut values = [0.0f64; 4];
        for (i, part) in parts.iter().enumerate() {
            values[i] = part
                .parse()
                .map_err(|_| format!("invalid coordinate: {}", part))?;
        }
        let bbox = BoundingBox::new(values[0], values[1], values[2], values[3]);
        if bbox.min_lat > bbox.max_lat || bbox.min_lon > bbox.max_lon {
            return Err("bounds are inverted".to_string());
        }
        Ok(bbox)
    }
}

/// Area of a closed `[lon, lat]` ring in square meters, shoelace formula.
///
/// Degrees are converted to meters at the mid-latitude of the ring, which is
/// adequate for the small parcels this service sees (a parking lot spans well
/// under a kilometer).
pub fn polygon_area_m2(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let mid_lat = ring.iter().map(|c| c[1]).sum::<f64>() / ring.len() as f64;
    let lat_to_m = 111_320.0;
    let lon_to_m = 111_320.0 * mid_lat.to_radians().cos();

    let mut area = 0.0;
    for window in ring.windows(2) {
        let (x1, y1) = (window[0][0] * lon_to_m, window[0][1] * lat_to_m);
        let (x2, y2) = (window[1][0] * lon_to_m, window[1][1] * lat_to_m);
        area += x1 * y2 - x2 * y1;
    }

    area.abs() / 2.0
}

/// Representative point of a ring: the vertex centroid.
pub fn ring_centroid(ring: &[[f64; 2]]) -> Option<GeoPoint> {
    if ring.is_empty() {
        return None;
    }
    let n = ring.len() as f64;
    let lon = ring.iter().map(|c| c[0]).sum::<f64>() / n;
    let lat = ring.iter().map(|c| c[1]).sum::<f64>() / n;
    Some(GeoPoint::new(lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        let p = GeoPoint::new(52.0, 4.5);
        assert!(haversine_distance(p, p) < 1e-9);
    }

    #[test]
    fn test_haversine_known_distance() {
        // Roughly 111 km per degree of latitude
        let a = GeoPoint::new(52.0, 4.5);
        let b = GeoPoint::new(53.0, 4.5);
        let d = haversine_distance(a, b);
        assert!((d - 111_195.0).abs() < 200.0, "got {}", d);
    }

    #[test]
    fn test_haversine_short_range() {
        // ~150m east at 52N is about 0.00219 degrees of longitude
        let a = GeoPoint::new(52.0, 4.5);
        let b = GeoPoint::new(52.0, 4.50219);
        let d = haversine_distance(a, b);
        assert!(d > 140.0 && d < 160.0, "got {}", d);
    }

    #[test]
    fn test_netherlands_envelope() {
        assert!(NETHERLANDS.contains(GeoPoint::new(51.929, 4.022))); // Maasvlakte
        assert!(!NETHERLANDS.contains(GeoPoint::new(48.85, 2.35))); // Paris
        assert!(EUROPE.contains(GeoPoint::new(48.85, 2.35)));
    }

    #[test]
    fn test_bbox_parse() {
        let bbox: BoundingBox = "52.0,4.5,52.5,5.0".parse().unwrap();
        assert_eq!(bbox.min_lat, 52.0);
        assert_eq!(bbox.max_lon, 5.0);
        assert!(bbox.contains(GeoPoint::new(52.2, 4.7)));
        assert!(!bbox.contains(GeoPoint::new(51.9, 4.7)));

        assert!("52.0,4.5,52.5".parse::<BoundingBox>().is_err());
        assert!("52.5,4.5,52.0,5.0".parse::<BoundingBox>().is_err());
        assert!("x,4.5,52.5,5.0".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_polygon_area_square() {
        // ~100m x ~100m square at 52N
        let lat0: f64 = 52.0;
        let lon0 = 4.5;
        let dlat = 100.0 / 111_320.0;
        let dlon = 100.0 / (111_320.0 * lat0.to_radians().cos());
        let ring = vec![
            [lon0, lat0],
            [lon0 + dlon, lat0],
            [lon0 + dlon, lat0 + dlat],
            [lon0, lat0 + dlat],
            [lon0, lat0],
        ];
        let area = polygon_area_m2(&ring);
        assert!((area - 10_000.0).abs() < 150.0, "got {}", area);
    }

    #[test]
    fn test_polygon_area_degenerate() {
        assert_eq!(polygon_area_m2(&[]), 0.0);
        assert_eq!(polygon_area_m2(&[[4.5, 52.0], [4.6, 52.0]]), 0.0);
    }
}
