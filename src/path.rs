//! Session paths for map display.
//!
//! The map draws one polyline per run of positions with the same activity
//! type, coloured by activity. Consecutive segments share their boundary point
//! so the drawn path has no gaps.

use geo::{algorithm::simplify::Simplify, LineString};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::geo_utils::{polyline_length, Bounds, GpsPoint};
use crate::persistence::Position;

/// Precision of encoded polylines (5 decimal places, standard for GPS).
const POLYLINE_PRECISION: u32 = 5;

/// A run of positions with one activity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSegment {
    pub activity_type: ActivityType,
    /// Points to draw, possibly simplified
    pub points: Vec<GpsPoint>,
    /// Length of the unsimplified segment in meters
    pub distance: f64,
    /// Google encoded polyline of `points`
    pub encoded: String,
}

/// Everything the map needs to draw one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPath {
    pub session_id: i64,
    pub segments: Vec<PathSegment>,
    /// Camera bounds, `None` for a session without positions
    pub bounds: Option<Bounds>,
    /// Camera target, the middle of `bounds`
    pub center: Option<GpsPoint>,
    /// Sum of the stored incremental distances
    pub total_distance: f64,
}

impl SessionPath {
    /// Build the path from positions in time order.
    ///
    /// `tolerance` is the Douglas-Peucker epsilon in degrees; 0 keeps every point.
    pub fn from_positions(session_id: i64, positions: &[Position], tolerance: f64) -> Self {
        let all_points: Vec<GpsPoint> = positions.iter().map(Position::point).collect();
        let total_distance = positions.iter().map(|p| p.distance).sum();

        let mut runs: Vec<(ActivityType, Vec<GpsPoint>)> = Vec::new();
        let mut previous: Option<GpsPoint> = None;
        for position in positions {
            let point = position.point();
            match runs.last_mut() {
                Some((activity, points)) if *activity == position.activity_type => {
                    points.push(point);
                }
                _ => {
                    let mut points = Vec::new();
                    if let Some(prev) = previous {
                        points.push(prev);
                    }
                    points.push(point);
                    runs.push((position.activity_type, points));
                }
            }
            previous = Some(point);
        }

        let segments = runs
            .into_iter()
            .map(|(activity_type, points)| build_segment(activity_type, points, tolerance))
            .collect();

        let bounds = Bounds::from_points(&all_points);
        Self {
            session_id,
            segments,
            bounds,
            center: bounds.map(|b| b.center()),
            total_distance,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of points across all segments, shared boundary points included.
    pub fn point_count(&self) -> usize {
        self.segments.iter().map(|s| s.points.len()).sum()
    }
}

fn build_segment(activity_type: ActivityType, points: Vec<GpsPoint>, tolerance: f64) -> PathSegment {
    let distance = polyline_length(&points);

    let line: LineString<f64> = points.iter().map(|p| (p.longitude, p.latitude)).collect();
    let line = if tolerance > 0.0 && points.len() > 2 {
        line.simplify(&tolerance)
    } else {
        line
    };

    let points: Vec<GpsPoint> = line.coords().map(|c| GpsPoint::new(c.y, c.x)).collect();
    let encoded = polyline::encode_coordinates(line, POLYLINE_PRECISION).unwrap_or_default();

    PathSegment {
        activity_type,
        points,
        distance,
        encoded,
    }
}

/// Decode a Google encoded polyline back to points.
pub fn decode_polyline(encoded: &str) -> Vec<GpsPoint> {
    if encoded.is_empty() {
        return Vec::new();
    }
    polyline::decode_polyline(encoded, POLYLINE_PRECISION)
        .map(|line| line.coords().map(|c| GpsPoint::new(c.y, c.x)).collect())
        .unwrap_or_default()
}
