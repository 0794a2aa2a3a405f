//! Distance notifications.
//!
//! The platform owns the actual notification UI. This module defines the
//! contract it implements and the text it should show.

use log::info;

/// Meters in a kilometer.
const METERS_IN_A_KM: f64 = 1000.0;

/// Receiver of distance updates for the ongoing-tracking notification.
///
/// Both methods are invoked synchronously, after the new state has been
/// persisted.
pub trait NotificationSink {
    /// Show (or refresh) the running distance for a session.
    fn show_distance(&mut self, session_id: i64, total_distance_meters: f64);

    /// Remove the distance notification.
    fn dismiss(&mut self);
}

/// Format a distance for display: whole meters below 1 km, otherwise km with
/// two decimals.
///
/// ```
/// use friendfence::notification::format_distance;
/// assert_eq!(format_distance(999.4), "999 m");
/// assert_eq!(format_distance(1500.0), "1.50 km");
/// ```
pub fn format_distance(distance_meters: f64) -> String {
    if distance_meters < METERS_IN_A_KM {
        format!("{:.0} m", distance_meters)
    } else {
        format!("{:.2} km", distance_meters / METERS_IN_A_KM)
    }
}

/// Sink that writes the notification text to the log.
///
/// Used on hosts without a notification surface.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSink {
    last_text: Option<String>,
}

impl LogNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of the notification currently "shown", if any.
    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }
}

impl NotificationSink for LogNotificationSink {
    fn show_distance(&mut self, session_id: i64, total_distance_meters: f64) {
        let text = format!(
            "Session {}: {}",
            session_id,
            format_distance(total_distance_meters)
        );
        info!("[Notification] {}", text);
        self.last_text = Some(text);
    }

    fn dismiss(&mut self) {
        if self.last_text.take().is_some() {
            info!("[Notification] Dismissed distance notification");
        }
    }
}
