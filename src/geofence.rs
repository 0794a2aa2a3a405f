//! Geofence regions.
//!
//! A geofence is a circle the user drops on the map. Triggering is done by the
//! platform; this crate stores the fences and answers containment queries.

use serde::{Deserialize, Serialize};

use crate::error::{FenceError, Result};
use crate::geo_utils::GpsPoint;

/// Default radius in meters.
pub const DEFAULT_RADIUS_METERS: f64 = 500.0;
/// Default lifetime: one day.
pub const DEFAULT_EXPIRATION_MS: i64 = 24 * 60 * 60 * 1000;
/// Default time inside the fence before a dwell fires: one hour.
pub const DEFAULT_LOITERING_DELAY_MS: i64 = 60 * 60 * 1000;
/// Default maximum delay between the event and its notification: one minute.
pub const DEFAULT_NOTIFICATION_RESPONSIVENESS_MS: i64 = 60 * 1000;

/// Which crossing of the fence boundary should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    #[default]
    Enter,
    Exit,
    Dwell,
}

impl TransitionType {
    pub fn code(self) -> i64 {
        match self {
            TransitionType::Enter => 1,
            TransitionType::Exit => 2,
            TransitionType::Dwell => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TransitionType::Enter),
            2 => Some(TransitionType::Exit),
            4 => Some(TransitionType::Dwell),
            _ => None,
        }
    }
}

/// A circular region with its trigger settings.
///
/// # Example
/// ```
/// use friendfence::{Geofence, GpsPoint, TransitionType};
///
/// let fence = Geofence::new("home", 41.9028, 12.4964)
///     .with_radius(200.0)
///     .with_transition_type(TransitionType::Dwell);
/// assert!(fence.contains(&GpsPoint::new(41.9030, 12.4965)));
/// assert_eq!(fence.loitering_delay(), Some(3_600_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub fence_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters
    pub radius: f64,
    /// Lifetime in milliseconds from creation
    pub expiration_duration_ms: i64,
    pub transition_type: TransitionType,
    /// Preferred delay between the event and its notification (ms)
    pub notification_responsiveness_ms: i64,
    /// Time inside the fence before a dwell transition (ms)
    pub loitering_delay_ms: i64,
    /// Creation time (unix ms), set when the fence is saved
    pub created_at: i64,
}

impl Geofence {
    /// Create a fence with default radius, lifetime and triggers.
    pub fn new(fence_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            fence_id: fence_id.into(),
            latitude,
            longitude,
            radius: DEFAULT_RADIUS_METERS,
            expiration_duration_ms: DEFAULT_EXPIRATION_MS,
            transition_type: TransitionType::Enter,
            notification_responsiveness_ms: DEFAULT_NOTIFICATION_RESPONSIVENESS_MS,
            loitering_delay_ms: DEFAULT_LOITERING_DELAY_MS,
            created_at: 0,
        }
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_transition_type(mut self, transition_type: TransitionType) -> Self {
        self.transition_type = transition_type;
        self
    }

    pub fn with_expiration_duration(mut self, duration_ms: i64) -> Self {
        self.expiration_duration_ms = duration_ms;
        self
    }

    pub fn with_loitering_delay(mut self, delay_ms: i64) -> Self {
        self.loitering_delay_ms = delay_ms;
        self
    }

    pub fn with_notification_responsiveness(mut self, responsiveness_ms: i64) -> Self {
        self.notification_responsiveness_ms = responsiveness_ms;
        self
    }

    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Loitering delay, only for dwell fences.
    pub fn loitering_delay(&self) -> Option<i64> {
        (self.transition_type == TransitionType::Dwell).then_some(self.loitering_delay_ms)
    }

    /// True if `point` is within `radius` meters of the center.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        self.center().distance_to(point) <= self.radius
    }

    /// True once the lifetime has elapsed. A negative duration never expires.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiration_duration_ms >= 0
            && now_ms >= self.created_at.saturating_add(self.expiration_duration_ms)
    }

    /// Check the fence can be registered.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| FenceError::InvalidGeofence {
            fence_id: self.fence_id.clone(),
            message: message.to_string(),
        };

        if self.fence_id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if !self.center().is_valid() {
            return Err(invalid("center is not a valid coordinate"));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(invalid("radius must be positive"));
        }
        if self.notification_responsiveness_ms < 0 || self.loitering_delay_ms < 0 {
            return Err(invalid("delays must not be negative"));
        }
        Ok(())
    }
}
