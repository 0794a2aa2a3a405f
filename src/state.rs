//! # Session State
//!
//! The tracking state machine: *inactive* until [`SessionState::start`],
//! *active* until [`SessionState::stop`]. While active it remembers the last
//! coordinate and the running distance so each new sample only needs the
//! previous one.
//!
//! All fields are written through to a [`StateStore`], so a restarted process
//! picks up where the previous one stopped. Store writes always happen before
//! the [`NotificationSink`] is called.
//!
//! The edits for each transition are built by [`start_edits`], [`stop_edits`]
//! and [`location_edits`]. Callers that have to commit them together with
//! database rows put them in a [`crate::FenceOp::State`] batch and then call
//! the matching `*_committed` hook.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::error::Result;
use crate::geo_utils::GpsPoint;
use crate::notification::NotificationSink;
use crate::store::{keys, StateEdit, StateStore, StateValue};

/// Distance figures produced by one location sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceUpdate {
    /// Meters from the previous sample (0 for the first one)
    pub incremental: f64,
    /// Running total for the session in meters
    pub total: f64,
}

/// Edits that make `session_id` active with a fresh accumulator.
pub fn start_edits(session_id: i64) -> Vec<StateEdit> {
    vec![
        StateEdit::Put(keys::CURRENT_SESSION_ID, StateValue::Int(session_id)),
        StateEdit::Put(keys::CURRENT_DISTANCE, StateValue::Float(0.0)),
        StateEdit::Put(
            keys::ACTIVITY_STATE,
            StateValue::Int(ActivityType::Unknown.code()),
        ),
        StateEdit::Remove(keys::LAST_LATITUDE),
        StateEdit::Remove(keys::LAST_LONGITUDE),
    ]
}

/// Edits that clear the active session.
pub fn stop_edits() -> Vec<StateEdit> {
    vec![
        StateEdit::Remove(keys::CURRENT_SESSION_ID),
        StateEdit::Remove(keys::LAST_LATITUDE),
        StateEdit::Remove(keys::LAST_LONGITUDE),
        StateEdit::Remove(keys::ACTIVITY_STATE),
        StateEdit::Put(keys::CURRENT_DISTANCE, StateValue::Float(0.0)),
    ]
}

/// Edits that make `point` the last coordinate with the new running total.
pub fn location_edits(point: &GpsPoint, update: &DistanceUpdate) -> Vec<StateEdit> {
    vec![
        StateEdit::Put(keys::LAST_LATITUDE, StateValue::Float(point.latitude)),
        StateEdit::Put(keys::LAST_LONGITUDE, StateValue::Float(point.longitude)),
        StateEdit::Put(keys::CURRENT_DISTANCE, StateValue::Float(update.total)),
    ]
}

/// Persisted tracking state with an attached notification sink.
pub struct SessionState<S: StateStore, N: NotificationSink> {
    store: S,
    notifier: N,
    /// Cached copy of the persisted activity type
    current_activity: ActivityType,
}

impl<S: StateStore, N: NotificationSink> SessionState<S, N> {
    /// Wrap a store and a sink. Existing persisted state is kept.
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            store,
            notifier,
            current_activity: ActivityType::Unknown,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Mark tracking as active for `session_id`.
    ///
    /// Resets the running distance, the last coordinate and the activity
    /// type. Does nothing and returns `false` if a session is already active.
    pub fn start(&mut self, session_id: i64) -> Result<bool> {
        if let Some(active) = self.session_id()? {
            warn!(
                "[SessionState] Start of session {} ignored: session {} is active",
                session_id, active
            );
            return Ok(false);
        }

        self.store.apply(&start_edits(session_id))?;
        self.start_committed(session_id);
        Ok(true)
    }

    /// Bookkeeping after [`start_edits`] for `session_id` were committed.
    pub fn start_committed(&mut self, session_id: i64) {
        self.current_activity = ActivityType::Unknown;
        info!("[SessionState] Start session {}", session_id);
    }

    /// Mark tracking as inactive and dismiss the distance notification.
    pub fn stop(&mut self) -> Result<()> {
        let session_id = self.session_id()?;
        self.store.apply(&stop_edits())?;
        self.stop_committed(session_id);
        Ok(())
    }

    /// Bookkeeping after [`stop_edits`] were committed.
    pub fn stop_committed(&mut self, session_id: Option<i64>) {
        self.current_activity = ActivityType::Unknown;
        info!("[SessionState] Stop session {:?}", session_id);
        self.notifier.dismiss();
    }

    /// True while a session is being tracked.
    pub fn is_running(&self) -> Result<bool> {
        Ok(self.session_id()?.is_some())
    }

    /// Id of the active session, if any.
    pub fn session_id(&self) -> Result<Option<i64>> {
        self.store.get_i64(keys::CURRENT_SESSION_ID)
    }

    // ========================================================================
    // Activity type
    // ========================================================================

    /// Persist the most recently detected activity. It tags the next samples.
    pub fn update_activity_type(&mut self, activity: ActivityType) -> Result<()> {
        self.store.apply(&[StateEdit::Put(
            keys::ACTIVITY_STATE,
            StateValue::Int(activity.code()),
        )])?;
        self.current_activity = activity;
        debug!("[SessionState] Activity type now {}", activity);
        Ok(())
    }

    /// Most recent activity type, falling back to the persisted value.
    pub fn activity_type(&self) -> Result<ActivityType> {
        if self.current_activity != ActivityType::Unknown {
            return Ok(self.current_activity);
        }
        Ok(self
            .store
            .get_i64(keys::ACTIVITY_STATE)?
            .map(ActivityType::from_code)
            .unwrap_or_default())
    }

    // ========================================================================
    // Distance accumulation
    // ========================================================================

    /// Last recorded coordinate, if any.
    pub fn last_location(&self) -> Result<Option<GpsPoint>> {
        let latitude = self.store.get_f64(keys::LAST_LATITUDE)?;
        let longitude = self.store.get_f64(keys::LAST_LONGITUDE)?;
        Ok(match (latitude, longitude) {
            (Some(lat), Some(lng)) => Some(GpsPoint::new(lat, lng)),
            _ => None,
        })
    }

    /// Running distance in meters.
    pub fn total_distance(&self) -> Result<f64> {
        Ok(self.store.get_f64(keys::CURRENT_DISTANCE)?.unwrap_or(0.0))
    }

    /// Compute the distance update for `point` without changing any state.
    pub fn preview_location(&self, point: &GpsPoint) -> Result<DistanceUpdate> {
        let incremental = match self.last_location()? {
            Some(previous) => previous.distance_to(point),
            None => 0.0,
        };
        let total = self.total_distance()? + incremental;
        Ok(DistanceUpdate { incremental, total })
    }

    /// Persist `point` and `update` as the new state, then notify the sink.
    pub fn commit_location(&mut self, point: &GpsPoint, update: &DistanceUpdate) -> Result<()> {
        self.store.apply(&location_edits(point, update))?;
        self.location_committed(point, update)
    }

    /// Notify the sink once [`location_edits`] for `point` were committed.
    pub fn location_committed(&mut self, point: &GpsPoint, update: &DistanceUpdate) -> Result<()> {
        debug!(
            "[SessionState] Distance to [{}, {}] is {:.1}m, total {:.1}m",
            point.latitude, point.longitude, update.incremental, update.total
        );

        match self.session_id()? {
            Some(session_id) => self.notifier.show_distance(session_id, update.total),
            None => debug!("[SessionState] No active session, notification skipped"),
        }
        Ok(())
    }

    /// Accumulate the distance to `point` and make it the last coordinate.
    pub fn add_location(&mut self, point: &GpsPoint) -> Result<DistanceUpdate> {
        let update = self.preview_location(point)?;
        self.commit_location(point, &update)?;
        Ok(update)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    /// Tear down, returning the store and the sink.
    pub fn into_parts(self) -> (S, N) {
        (self.store, self.notifier)
    }
}
