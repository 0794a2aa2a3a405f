//! Geographic utilities: coordinates, bounds and great-circle distance.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Latitude/longitude in degrees (WGS84).
///
/// # Example
/// ```
/// use friendfence::GpsPoint;
/// let rome = GpsPoint::new(41.9028, 12.4964);
/// assert!(rome.is_valid());
/// assert!(!GpsPoint::new(91.0, 0.0).is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside [-90, 90] x [-180, 180].
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Meters to `other` along the great circle.
    pub fn distance_to(&self, other: &GpsPoint) -> f64 {
        haversine_distance(self, other)
    }
}

/// Camera box for a drawn session: south-west and north-east corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub south_west: GpsPoint,
    pub north_east: GpsPoint,
}

impl Bounds {
    /// Degenerate box around a single point.
    pub fn around(point: GpsPoint) -> Self {
        Self {
            south_west: point,
            north_east: point,
        }
    }

    /// Grow the box so it includes `point`.
    pub fn include(&mut self, point: &GpsPoint) {
        self.south_west.latitude = self.south_west.latitude.min(point.latitude);
        self.south_west.longitude = self.south_west.longitude.min(point.longitude);
        self.north_east.latitude = self.north_east.latitude.max(point.latitude);
        self.north_east.longitude = self.north_east.longitude.max(point.longitude);
    }

    /// Smallest box containing every point. `None` for an empty slice.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Self::around(*first);
        for point in rest {
            bounds.include(point);
        }
        Some(bounds)
    }

    /// Where the map camera should point.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.south_west.latitude + self.north_east.latitude) / 2.0,
            (self.south_west.longitude + self.north_east.longitude) / 2.0,
        )
    }
}

/// Great-circle distance between two points in meters (haversine formula).
///
/// ```
/// use friendfence::geo_utils::haversine_distance;
/// use friendfence::GpsPoint;
///
/// let rome = GpsPoint::new(41.9028, 12.4964);
/// let milan = GpsPoint::new(45.4642, 9.1900);
/// let d = haversine_distance(&rome, &milan);
/// assert!((d / 1000.0 - 477.0).abs() < 5.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Total length of a path in meters.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}
