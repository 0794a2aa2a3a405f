//! Position recording.
//!
//! One location sample becomes one `positions` row, an update of the owning
//! session's total and the new tracking state, all in one transaction. The
//! notification goes out only once that transaction has committed.

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::error::{FenceError, Result};
use crate::geo_utils::GpsPoint;
use crate::notification::NotificationSink;
use crate::persistence::{FenceDb, FenceOp, NewPosition, OpResult, Position};
use crate::state::{self, SessionState};

/// A location fix delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub session_id: i64,
    pub point: GpsPoint,
    pub altitude: Option<f64>,
    /// Fix time, unix ms
    pub time: i64,
}

/// Records samples for the active session.
///
/// The tracking state lives in the same database as the positions, so both
/// advance in the same commit.
pub struct PositionRecorder<'a, N: NotificationSink> {
    state: &'a mut SessionState<FenceDb, N>,
}

impl<'a, N: NotificationSink> PositionRecorder<'a, N> {
    pub fn new(state: &'a mut SessionState<FenceDb, N>) -> Self {
        Self { state }
    }

    /// Store `sample` and advance the session distance.
    ///
    /// Fails without side effects if tracking is inactive, the sample belongs
    /// to another session, the coordinates are invalid, or the batch write is
    /// rejected.
    pub fn record(&mut self, sample: &LocationSample) -> Result<Position> {
        if !sample.point.is_valid() {
            return Err(FenceError::InvalidCoordinates {
                latitude: sample.point.latitude,
                longitude: sample.point.longitude,
            });
        }

        match self.state.session_id()? {
            None => return Err(FenceError::NotTracking),
            Some(active) if active != sample.session_id => {
                return Err(FenceError::SessionMismatch {
                    active,
                    requested: sample.session_id,
                });
            }
            Some(_) => {}
        }

        let update = self.state.preview_location(&sample.point)?;
        let activity_type = self.state.activity_type()?;

        let new_position = NewPosition {
            session_id: sample.session_id,
            time: sample.time,
            point: sample.point,
            altitude: sample.altitude,
            distance: update.incremental,
            activity_type,
        };
        let mut ops = vec![
            FenceOp::InsertPosition(new_position),
            FenceOp::UpdateSessionDistance {
                session_id: sample.session_id,
                total_distance: update.total,
            },
        ];
        ops.extend(
            state::location_edits(&sample.point, &update)
                .into_iter()
                .map(FenceOp::State),
        );

        let results = self.state.store_mut().apply_batch(&ops).map_err(|e| {
            error!(
                "[PositionRecorder] Failed to store position for session {}: {}",
                sample.session_id, e
            );
            e
        })?;

        self.state.location_committed(&sample.point, &update)?;

        let Some(&OpResult::Inserted(id)) = results.first() else {
            return Err(FenceError::Internal {
                message: "position insert returned no row id".to_string(),
            });
        };
        debug!(
            "[PositionRecorder] Session {} position {}: +{:.1}m = {:.1}m ({})",
            sample.session_id, id, update.incremental, update.total, activity_type
        );

        Ok(Position {
            id,
            session_id: sample.session_id,
            time: sample.time,
            latitude: sample.point.latitude,
            longitude: sample.point.longitude,
            altitude: sample.altitude,
            distance: update.incremental,
            activity_type,
        })
    }
}
