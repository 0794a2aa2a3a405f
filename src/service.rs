//! # Tracking Service
//!
//! Owns the database and the session state for the lifetime of the platform
//! service. Construct it once when the service starts, feed it every location
//! and activity callback through [`TrackingService::handle`], and drop it (or
//! call [`TrackingService::shutdown`]) when the service is destroyed.
//!
//! Callbacks are delivered one at a time, so every mutation takes `&mut self`
//! and no locking is involved. The tracking state is kept in the same
//! database as the sessions, so starting, stopping and recording each commit
//! in a single transaction.
//!
//! # Example
//! ```
//! use friendfence::{
//!     FenceConfig, GpsPoint, LocationSample, LogNotificationSink, TrackingEvent, TrackingService,
//! };
//!
//! let mut service =
//!     TrackingService::open(FenceConfig::in_memory(), LogNotificationSink::new()).unwrap();
//! let session = service.start_tracking(None).unwrap();
//!
//! for (i, lat) in [45.000, 45.001, 45.002].into_iter().enumerate() {
//!     service
//!         .handle(TrackingEvent::Location(LocationSample {
//!             session_id: session.id,
//!             point: GpsPoint::new(lat, 9.0),
//!             altitude: None,
//!             time: i as i64 * 1000,
//!         }))
//!         .unwrap();
//! }
//!
//! let closed = service.stop_tracking().unwrap().unwrap();
//! assert!(closed.total_distance > 200.0);
//! ```

use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::config::FenceConfig;
use crate::error::{FenceError, OptionExt, Result};
use crate::geofence::Geofence;
use crate::notification::NotificationSink;
use crate::path::SessionPath;
use crate::persistence::{FenceDb, FenceOp, Position, Session};
use crate::recorder::{LocationSample, PositionRecorder};
use crate::state::{self, SessionState};
use crate::store::StateStore;

/// A callback from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingEvent {
    Location(LocationSample),
    ActivityDetected(ActivityType),
}

/// What [`TrackingService::handle`] did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Recorded(Position),
    ActivityUpdated(ActivityType),
}

/// Tracking service over a SQLite database.
pub struct TrackingService<N: NotificationSink> {
    config: FenceConfig,
    /// Tracking state over the database that also holds the sessions
    state: SessionState<FenceDb, N>,
}

impl<N: NotificationSink> TrackingService<N> {
    /// Open the database named in `config` and restore any persisted state.
    pub fn open(config: FenceConfig, notifier: N) -> Result<Self> {
        crate::init_logging(config.log_level_filter()?);
        let db = FenceDb::open(&config.db_path)?;
        Ok(Self::with_parts(config, SessionState::new(db, notifier)))
    }

    /// Assemble a service from an already opened state.
    pub fn with_parts(config: FenceConfig, state: SessionState<FenceDb, N>) -> Self {
        match state.session_id() {
            Ok(Some(id)) => info!("[TrackingService] Resuming session {}", id),
            Ok(None) => info!("[TrackingService] Ready, not tracking"),
            Err(e) => warn!("[TrackingService] Could not read tracking state: {}", e),
        }
        Self { config, state }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a new session, or return the active one if already tracking.
    pub fn start_tracking(&mut self, owner: Option<&str>) -> Result<Session> {
        if let Some(active) = self.state.session_id()? {
            warn!(
                "[TrackingService] Already tracking session {}, start ignored",
                active
            );
            return self
                .state
                .store()
                .get_session(active)?
                .ok_or_session_not_found(active);
        }

        let owner = owner.unwrap_or(&self.config.default_owner);
        let session = self.state.store_mut().create_session_with_state(
            owner,
            Utc::now().timestamp_millis(),
            state::start_edits,
        )?;
        self.state.start_committed(session.id);
        Ok(session)
    }

    /// Close the active session. `None` if nothing was being tracked.
    pub fn stop_tracking(&mut self) -> Result<Option<Session>> {
        let Some(session_id) = self.state.session_id()? else {
            warn!("[TrackingService] Stop requested while not tracking");
            return Ok(None);
        };

        let mut ops = vec![FenceOp::CloseSession {
            session_id,
            end_date: Utc::now().timestamp_millis(),
        }];
        ops.extend(state::stop_edits().into_iter().map(FenceOp::State));

        // The row may be gone if the user deleted the session while recording
        let closed = match self.state.store_mut().apply_batch(&ops) {
            Ok(_) => self.state.store().get_session(session_id)?,
            Err(FenceError::SessionNotFound(_)) => {
                warn!(
                    "[TrackingService] Session {} no longer exists, clearing state",
                    session_id
                );
                self.state.store_mut().apply(&state::stop_edits())?;
                None
            }
            Err(e) => return Err(e),
        };
        self.state.stop_committed(Some(session_id));
        Ok(closed)
    }

    pub fn is_tracking(&self) -> Result<bool> {
        self.state.is_running()
    }

    /// Consume the service, returning the notification sink.
    pub fn shutdown(self) -> N {
        info!("[TrackingService] Shut down");
        let (_, notifier) = self.state.into_parts();
        notifier
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Dispatch one platform callback.
    pub fn handle(&mut self, event: TrackingEvent) -> Result<EventOutcome> {
        match event {
            TrackingEvent::Location(sample) => {
                let position = PositionRecorder::new(&mut self.state)
                    .record(&sample)
                    .map_err(|e| {
                        error!(
                            "[TrackingService] Location for session {} dropped: {}",
                            sample.session_id, e
                        );
                        e
                    })?;
                Ok(EventOutcome::Recorded(position))
            }
            TrackingEvent::ActivityDetected(activity) => {
                info!("[TrackingService] Activity detected: {}", activity);
                self.state.update_activity_type(activity)?;
                Ok(EventOutcome::ActivityUpdated(activity))
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Map path of a session, using the configured simplification.
    pub fn session_path(&self, session_id: i64) -> Result<SessionPath> {
        let db = self.state.store();
        db.get_session(session_id)?
            .ok_or_session_not_found(session_id)?;
        let positions = db.positions_for_session(session_id)?;
        Ok(SessionPath::from_positions(
            session_id,
            &positions,
            self.config.path_simplification_tolerance,
        ))
    }

    /// New geofence at a point with the configured defaults.
    pub fn new_geofence(&self, fence_id: &str, latitude: f64, longitude: f64) -> Geofence {
        Geofence::new(fence_id, latitude, longitude)
            .with_radius(self.config.default_geofence_radius)
            .with_expiration_duration(self.config.default_geofence_duration_ms)
    }

    pub fn config(&self) -> &FenceConfig {
        &self.config
    }

    pub fn database(&self) -> &FenceDb {
        self.state.store()
    }

    /// Direct database access. Writes to `service_state` here bypass the
    /// session bookkeeping.
    pub fn database_mut(&mut self) -> &mut FenceDb {
        self.state.store_mut()
    }

    pub fn state(&self) -> &SessionState<FenceDb, N> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::GpsPoint;
    use crate::notification::LogNotificationSink;
    use crate::store::keys;

    fn open() -> TrackingService<LogNotificationSink> {
        TrackingService::open(FenceConfig::in_memory(), LogNotificationSink::new()).unwrap()
    }

    fn location(session_id: i64, time: i64, lat: f64) -> TrackingEvent {
        TrackingEvent::Location(LocationSample {
            session_id,
            point: GpsPoint::new(lat, 12.0),
            altitude: Some(30.0),
            time,
        })
    }

    #[test]
    fn test_start_uses_default_owner() {
        let mut service = open();
        let session = service.start_tracking(None).unwrap();
        assert_eq!(session.owner, "defaultUser");
        assert!(service.is_tracking().unwrap());

        let named = open().start_tracking(Some("massimo")).unwrap();
        assert_eq!(named.owner, "massimo");
    }

    #[test]
    fn test_start_twice_returns_active_session() {
        let mut service = open();
        let first = service.start_tracking(None).unwrap();
        let second = service.start_tracking(Some("other")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(service.database().list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_stop_closes_session() {
        let mut service = open();
        let session = service.start_tracking(None).unwrap();
        service.handle(location(session.id, 1, 41.0)).unwrap();
        service.handle(location(session.id, 2, 41.001)).unwrap();

        let closed = service.stop_tracking().unwrap().unwrap();
        assert!(closed.end_date.is_some());
        assert!(closed.total_distance > 100.0);
        assert!(!service.is_tracking().unwrap());
        assert_eq!(service.stop_tracking().unwrap(), None);
    }

    #[test]
    fn test_activity_events_tag_positions() {
        let mut service = open();
        let session = service.start_tracking(None).unwrap();

        let outcome = service
            .handle(TrackingEvent::ActivityDetected(ActivityType::Running))
            .unwrap();
        assert_eq!(outcome, EventOutcome::ActivityUpdated(ActivityType::Running));

        match service.handle(location(session.id, 1, 41.0)).unwrap() {
            EventOutcome::Recorded(position) => {
                assert_eq!(position.activity_type, ActivityType::Running)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_location_when_not_tracking_fails() {
        let mut service = open();
        assert!(service.handle(location(1, 1, 41.0)).is_err());
    }

    #[test]
    fn test_session_path() {
        let mut service = open();
        let session = service.start_tracking(None).unwrap();
        service.handle(location(session.id, 1, 41.0)).unwrap();
        service.handle(location(session.id, 2, 41.001)).unwrap();

        let path = service.session_path(session.id).unwrap();
        assert_eq!(path.segments.len(), 1);
        assert_eq!(path.point_count(), 2);
        assert!(service.session_path(session.id + 1).is_err());
    }

    #[test]
    fn test_new_geofence_uses_config() {
        let config = FenceConfig {
            default_geofence_radius: 150.0,
            ..FenceConfig::in_memory()
        };
        let service = TrackingService::open(config, LogNotificationSink::new()).unwrap();
        let fence = service.new_geofence("gym", 41.0, 12.0);
        assert_eq!(fence.radius, 150.0);
        assert_eq!(fence.expiration_duration_ms, 86_400_000);
    }

    #[test]
    fn test_failed_start_leaves_no_open_session() {
        let mut service = open();
        service.database().fail_state_writes(keys::CURRENT_SESSION_ID);

        assert!(service.start_tracking(None).is_err());
        assert!(service.database().list_sessions().unwrap().is_empty());
        assert!(!service.is_tracking().unwrap());

        service.database().restore_state_writes();
        let session = service.start_tracking(None).unwrap();
        assert!(session.is_open());
    }

    #[test]
    fn test_failed_stop_keeps_session_open() {
        let mut service = open();
        let session = service.start_tracking(None).unwrap();
        service.database().fail_state_writes(keys::CURRENT_SESSION_ID);

        assert!(service.stop_tracking().is_err());
        let stored = service.database().get_session(session.id).unwrap().unwrap();
        assert!(stored.is_open());
        assert_eq!(service.state().session_id().unwrap(), Some(session.id));

        service.database().restore_state_writes();
        let closed = service.stop_tracking().unwrap().unwrap();
        assert!(!closed.is_open());
    }

    #[test]
    fn test_shutdown_returns_sink() {
        let mut service = open();
        let session = service.start_tracking(None).unwrap();
        service.handle(location(session.id, 1, 41.0)).unwrap();
        let sink = service.shutdown();
        assert!(sink
            .last_text()
            .unwrap()
            .starts_with(&format!("Session {}", session.id)));
    }
}
