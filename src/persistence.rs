//! # Fence Database
//!
//! SQLite storage for sessions, positions and geofences.
//!
//! ## Tables
//!
//! - `sessions`: one row per tracking interval, with the running total distance
//! - `positions`: samples of a session (cascade-deleted with it)
//! - `geofences`: user regions, keyed by their textual id
//! - `service_state`: the persisted tracking state (see [`StateStore`])
//!
//! Position inserts, the matching session update and the tracking state edits
//! go through [`FenceDb::apply_batch`], which runs them in a single
//! transaction. A crash between two writes can never leave the stored total
//! and the tracking state disagreeing.

use chrono::Utc;
use log::{debug, error, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::error::{FenceError, OptionExt, Result};
use crate::geo_utils::GpsPoint;
use crate::geofence::{Geofence, TransitionType};
use crate::migrations;
use crate::store::{self, StateEdit, StateStore, StateValue};

// ============================================================================
// Types
// ============================================================================

/// One contiguous tracking interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub owner: String,
    /// Unix timestamp (ms)
    pub start_date: i64,
    /// Unix timestamp (ms), `None` while the session is open
    pub end_date: Option<i64>,
    /// Meters
    pub total_distance: f64,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }
}

/// A stored location sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: i64,
    pub session_id: i64,
    /// Unix timestamp (ms)
    pub time: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above the WGS84 ellipsoid, when the fix has one
    pub altitude: Option<f64>,
    /// Meters from the previous position of the same session
    pub distance: f64,
    pub activity_type: ActivityType,
}

impl Position {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A position that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub session_id: i64,
    pub time: i64,
    pub point: GpsPoint,
    pub altitude: Option<f64>,
    pub distance: f64,
    pub activity_type: ActivityType,
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FenceOp {
    InsertPosition(NewPosition),
    /// Fails the batch if no session has this id
    UpdateSessionDistance { session_id: i64, total_distance: f64 },
    /// Fails the batch if no session has this id
    CloseSession { session_id: i64, end_date: i64 },
    /// Tracking state change, committed with the rest of the batch
    State(StateEdit),
}

/// Outcome of one [`FenceOp`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpResult {
    /// Row id of the inserted row
    Inserted(i64),
    /// Number of rows changed
    Updated(usize),
}

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed store for sessions, positions and geofences.
pub struct FenceDb {
    pub(crate) db: Connection,
    db_path: String,
}

impl FenceDb {
    /// Open (or create) the database at `db_path` and migrate it.
    pub fn open(db_path: &str) -> Result<Self> {
        let mut db = Connection::open(db_path)?;
        db.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut db)?;

        info!("[FenceDb] Opened {}", db_path);
        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create a new open session starting now.
    pub fn create_session(&self, owner: &str) -> Result<Session> {
        self.create_session_at(owner, Utc::now().timestamp_millis())
    }

    /// Create a new open session with an explicit start time.
    pub fn create_session_at(&self, owner: &str, start_date: i64) -> Result<Session> {
        self.db.execute(
            "INSERT INTO sessions (owner, start_date, total_distance) VALUES (?, ?, 0)",
            params![owner, start_date],
        )?;
        let id = self.db.last_insert_rowid();
        info!("[FenceDb] Created session {} for {}", id, owner);

        Ok(Session {
            id,
            owner: owner.to_string(),
            start_date,
            end_date: None,
            total_distance: 0.0,
        })
    }

    /// Create an open session and apply the state edits for it in one
    /// transaction. `state_edits` receives the new session id.
    pub fn create_session_with_state<F>(
        &mut self,
        owner: &str,
        start_date: i64,
        state_edits: F,
    ) -> Result<Session>
    where
        F: FnOnce(i64) -> Vec<StateEdit>,
    {
        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT INTO sessions (owner, start_date, total_distance) VALUES (?, ?, 0)",
            params![owner, start_date],
        )?;
        let id = tx.last_insert_rowid();
        for edit in state_edits(id) {
            store::write_state(&tx, &edit)?;
        }
        tx.commit()?;
        info!("[FenceDb] Created session {} for {} with tracking state", id, owner);

        Ok(Session {
            id,
            owner: owner.to_string(),
            start_date,
            end_date: None,
            total_distance: 0.0,
        })
    }

    /// Set the end date of a session to now.
    pub fn close_session(&self, session_id: i64) -> Result<()> {
        self.close_session_at(session_id, Utc::now().timestamp_millis())
    }

    /// Set the end date of a session.
    pub fn close_session_at(&self, session_id: i64, end_date: i64) -> Result<()> {
        let updated = self.db.execute(
            "UPDATE sessions SET end_date = ? WHERE id = ?",
            params![end_date, session_id],
        )?;
        if updated == 0 {
            return Err(FenceError::SessionNotFound(session_id));
        }
        info!("[FenceDb] Closed session {}", session_id);
        Ok(())
    }

    pub fn get_session(&self, session_id: i64) -> Result<Option<Session>> {
        let session = self
            .db
            .query_row(
                "SELECT id, owner, start_date, end_date, total_distance
                 FROM sessions WHERE id = ?",
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut stmt = self.db.prepare(
            "SELECT id, owner, start_date, end_date, total_distance
             FROM sessions ORDER BY start_date DESC, id DESC",
        )?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Delete a session and its positions. Returns false if it did not exist.
    pub fn delete_session(&self, session_id: i64) -> Result<bool> {
        let deleted = self
            .db
            .execute("DELETE FROM sessions WHERE id = ?", params![session_id])?;
        if deleted > 0 {
            info!("[FenceDb] Deleted session {}", session_id);
        }
        Ok(deleted > 0)
    }

    /// Stored total distance of a session.
    pub fn session_total(&self, session_id: i64) -> Result<f64> {
        let total: Option<f64> = self
            .db
            .query_row(
                "SELECT total_distance FROM sessions WHERE id = ?",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        total.ok_or_session_not_found(session_id)
    }

    // ========================================================================
    // Positions
    // ========================================================================

    /// Positions of a session in time order.
    pub fn positions_for_session(&self, session_id: i64) -> Result<Vec<Position>> {
        let mut stmt = self.db.prepare(
            "SELECT id, session_id, position_time, latitude, longitude, altitude, distance, activity
             FROM positions WHERE session_id = ?
             ORDER BY position_time ASC, id ASC",
        )?;
        let positions = stmt
            .query_map(params![session_id], row_to_position)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(positions)
    }

    pub fn position_count(&self, session_id: i64) -> Result<u32> {
        let count: u32 = self.db.query_row(
            "SELECT COUNT(*) FROM positions WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete every position of a session. The session total is left as is.
    pub fn delete_positions(&self, session_id: i64) -> Result<usize> {
        let deleted = self.db.execute(
            "DELETE FROM positions WHERE session_id = ?",
            params![session_id],
        )?;
        debug!(
            "[FenceDb] Deleted {} positions of session {}",
            deleted, session_id
        );
        Ok(deleted)
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Apply all operations in one transaction.
    ///
    /// On the first failure the transaction is rolled back and the error is
    /// returned; none of the operations remain visible.
    pub fn apply_batch(&mut self, ops: &[FenceOp]) -> Result<Vec<OpResult>> {
        let tx = self.db.transaction()?;
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            let result = match op {
                FenceOp::InsertPosition(position) => {
                    tx.execute(
                        "INSERT INTO positions
                            (session_id, position_time, latitude, longitude, altitude, distance, activity)
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                        params![
                            position.session_id,
                            position.time,
                            position.point.latitude,
                            position.point.longitude,
                            position.altitude,
                            position.distance,
                            position.activity_type.code(),
                        ],
                    )
                    .map_err(|e| log_batch_error(op, e.into()))?;
                    OpResult::Inserted(tx.last_insert_rowid())
                }
                FenceOp::UpdateSessionDistance {
                    session_id,
                    total_distance,
                } => {
                    let updated = tx
                        .execute(
                            "UPDATE sessions SET total_distance = ? WHERE id = ?",
                            params![total_distance, session_id],
                        )
                        .map_err(|e| log_batch_error(op, e.into()))?;
                    if updated == 0 {
                        return Err(log_batch_error(
                            op,
                            FenceError::SessionNotFound(*session_id),
                        ));
                    }
                    OpResult::Updated(updated)
                }
                FenceOp::CloseSession {
                    session_id,
                    end_date,
                } => {
                    let updated = tx
                        .execute(
                            "UPDATE sessions SET end_date = ? WHERE id = ?",
                            params![end_date, session_id],
                        )
                        .map_err(|e| log_batch_error(op, e.into()))?;
                    if updated == 0 {
                        return Err(log_batch_error(
                            op,
                            FenceError::SessionNotFound(*session_id),
                        ));
                    }
                    OpResult::Updated(updated)
                }
                FenceOp::State(edit) => {
                    let changed = store::write_state(&tx, edit)
                        .map_err(|e| log_batch_error(op, e.into()))?;
                    OpResult::Updated(changed)
                }
            };
            results.push(result);
        }

        tx.commit()?;
        Ok(results)
    }

    // ========================================================================
    // Geofences
    // ========================================================================

    /// Insert a geofence, replacing any fence with the same id.
    ///
    /// Returns the stored fence with its creation time set.
    pub fn save_geofence(&self, geofence: &Geofence) -> Result<Geofence> {
        geofence.validate()?;

        let mut stored = geofence.clone();
        if stored.created_at == 0 {
            stored.created_at = Utc::now().timestamp_millis();
        }

        self.db.execute(
            "INSERT OR REPLACE INTO geofences
                (fence_id, latitude, longitude, radius, duration, transition_type,
                 responsiveness, loitering_delay, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                stored.fence_id,
                stored.latitude,
                stored.longitude,
                stored.radius,
                stored.expiration_duration_ms,
                stored.transition_type.code(),
                stored.notification_responsiveness_ms,
                stored.loitering_delay_ms,
                stored.created_at,
            ],
        )?;
        info!("[FenceDb] Saved geofence {}", stored.fence_id);
        Ok(stored)
    }

    pub fn get_geofence(&self, fence_id: &str) -> Result<Option<Geofence>> {
        let geofence = self
            .db
            .query_row(
                "SELECT fence_id, latitude, longitude, radius, duration, transition_type,
                        responsiveness, loitering_delay, created_at
                 FROM geofences WHERE fence_id = ?",
                params![fence_id],
                row_to_geofence,
            )
            .optional()?;
        Ok(geofence)
    }

    /// All geofences in creation order.
    pub fn list_geofences(&self) -> Result<Vec<Geofence>> {
        let mut stmt = self.db.prepare(
            "SELECT fence_id, latitude, longitude, radius, duration, transition_type,
                    responsiveness, loitering_delay, created_at
             FROM geofences ORDER BY created_at ASC, fence_id ASC",
        )?;
        let geofences = stmt
            .query_map([], row_to_geofence)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(geofences)
    }

    /// Unexpired geofences that contain `point`.
    pub fn geofences_containing(&self, point: &GpsPoint, now_ms: i64) -> Result<Vec<Geofence>> {
        Ok(self
            .list_geofences()?
            .into_iter()
            .filter(|g| !g.is_expired(now_ms) && g.contains(point))
            .collect())
    }

    pub fn delete_geofence(&self, fence_id: &str) -> Result<bool> {
        let deleted = self
            .db
            .execute("DELETE FROM geofences WHERE fence_id = ?", params![fence_id])?;
        Ok(deleted > 0)
    }

    /// Remove geofences whose lifetime has elapsed. Returns how many went.
    pub fn delete_expired_geofences(&self, now_ms: i64) -> Result<usize> {
        let deleted = self.db.execute(
            "DELETE FROM geofences WHERE duration >= 0 AND created_at + duration <= ?",
            params![now_ms],
        )?;
        if deleted > 0 {
            info!("[FenceDb] Removed {} expired geofences", deleted);
        }
        Ok(deleted)
    }
}

impl StateStore for FenceDb {
    fn get(&self, key: &str) -> Result<Option<StateValue>> {
        store::read_state(&self.db, key)
    }

    fn apply(&mut self, edits: &[StateEdit]) -> Result<()> {
        let tx = self.db.transaction()?;
        for edit in edits {
            store::write_state(&tx, edit)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
impl FenceDb {
    /// Make every write of `key` to the state table abort, like a full disk.
    pub(crate) fn fail_state_writes(&self, key: &str) {
        self.db
            .execute_batch(&format!(
                "CREATE TRIGGER fail_state_insert BEFORE INSERT ON service_state
                 WHEN NEW.key = '{key}' BEGIN SELECT RAISE(ABORT, 'state write failed'); END;
                 CREATE TRIGGER fail_state_update BEFORE UPDATE ON service_state
                 WHEN NEW.key = '{key}' BEGIN SELECT RAISE(ABORT, 'state write failed'); END;
                 CREATE TRIGGER fail_state_delete BEFORE DELETE ON service_state
                 WHEN OLD.key = '{key}' BEGIN SELECT RAISE(ABORT, 'state write failed'); END;"
            ))
            .unwrap();
    }

    pub(crate) fn restore_state_writes(&self) {
        self.db
            .execute_batch(
                "DROP TRIGGER fail_state_insert;
                 DROP TRIGGER fail_state_update;
                 DROP TRIGGER fail_state_delete;",
            )
            .unwrap();
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        owner: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        total_distance: row.get(4)?,
    })
}

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    let activity: i64 = row.get(7)?;
    Ok(Position {
        id: row.get(0)?,
        session_id: row.get(1)?,
        time: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        altitude: row.get(5)?,
        distance: row.get(6)?,
        activity_type: ActivityType::from_code(activity),
    })
}

fn row_to_geofence(row: &Row<'_>) -> rusqlite::Result<Geofence> {
    let transition: i64 = row.get(5)?;
    Ok(Geofence {
        fence_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        radius: row.get(3)?,
        expiration_duration_ms: row.get(4)?,
        transition_type: TransitionType::from_code(transition).unwrap_or_default(),
        notification_responsiveness_ms: row.get(6)?,
        loitering_delay_ms: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn log_batch_error(op: &FenceOp, err: FenceError) -> FenceError {
    error!("[FenceDb] Batch rolled back at {:?}: {}", op, err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keys;

    fn new_position(session_id: i64, time: i64, lat: f64, distance: f64) -> NewPosition {
        NewPosition {
            session_id,
            time,
            point: GpsPoint::new(lat, 9.0),
            altitude: Some(120.0),
            distance,
            activity_type: ActivityType::Walking,
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 1_000).unwrap();
        assert!(session.is_open());
        assert_eq!(session.total_distance, 0.0);

        db.close_session_at(session.id, 2_000).unwrap();
        let stored = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.end_date, Some(2_000));
        assert!(!stored.is_open());

        assert!(matches!(
            db.close_session_at(999, 3_000),
            Err(FenceError::SessionNotFound(999))
        ));
        assert!(db.get_session(999).unwrap().is_none());
    }

    #[test]
    fn test_session_ids_are_monotonic_and_listed_newest_first() {
        let db = FenceDb::in_memory().unwrap();
        let a = db.create_session_at("a", 1_000).unwrap();
        let b = db.create_session_at("b", 2_000).unwrap();
        assert!(b.id > a.id);

        let sessions = db.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, b.id);
        assert_eq!(sessions[1].id, a.id);
    }

    #[test]
    fn test_batch_inserts_position_and_updates_session() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();

        let results = db
            .apply_batch(&[
                FenceOp::InsertPosition(new_position(session.id, 10, 45.0, 0.0)),
                FenceOp::UpdateSessionDistance {
                    session_id: session.id,
                    total_distance: 0.0,
                },
            ])
            .unwrap();
        assert!(matches!(results[0], OpResult::Inserted(_)));
        assert_eq!(results[1], OpResult::Updated(1));

        db.apply_batch(&[
            FenceOp::InsertPosition(new_position(session.id, 20, 45.001, 111.2)),
            FenceOp::UpdateSessionDistance {
                session_id: session.id,
                total_distance: 111.2,
            },
        ])
        .unwrap();

        let positions = db.positions_for_session(session.id).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].time, 10);
        assert_eq!(positions[1].distance, 111.2);
        assert_eq!(positions[1].activity_type, ActivityType::Walking);
        assert_eq!(positions[1].altitude, Some(120.0));
        assert_eq!(db.session_total(session.id).unwrap(), 111.2);
    }

    #[test]
    fn test_batch_rolls_back_when_session_missing() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();

        let result = db.apply_batch(&[
            FenceOp::InsertPosition(new_position(session.id, 10, 45.0, 5.0)),
            FenceOp::UpdateSessionDistance {
                session_id: session.id + 100,
                total_distance: 5.0,
            },
        ]);
        assert!(matches!(result, Err(FenceError::SessionNotFound(_))));
        assert_eq!(db.position_count(session.id).unwrap(), 0);
        assert_eq!(db.session_total(session.id).unwrap(), 0.0);
    }

    #[test]
    fn test_position_for_unknown_session_is_rejected() {
        let mut db = FenceDb::in_memory().unwrap();
        let result = db.apply_batch(&[FenceOp::InsertPosition(new_position(77, 10, 45.0, 0.0))]);
        assert!(matches!(result, Err(FenceError::Database(_))));
    }

    #[test]
    fn test_delete_session_removes_positions() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();
        db.apply_batch(&[FenceOp::InsertPosition(new_position(session.id, 10, 45.0, 0.0))])
            .unwrap();
        assert_eq!(db.position_count(session.id).unwrap(), 1);

        assert!(db.delete_session(session.id).unwrap());
        assert!(!db.delete_session(session.id).unwrap());
        assert_eq!(db.position_count(session.id).unwrap(), 0);
    }

    #[test]
    fn test_delete_positions_keeps_session() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();
        db.apply_batch(&[
            FenceOp::InsertPosition(new_position(session.id, 10, 45.0, 0.0)),
            FenceOp::InsertPosition(new_position(session.id, 20, 45.1, 0.0)),
        ])
        .unwrap();

        assert_eq!(db.delete_positions(session.id).unwrap(), 2);
        assert!(db.get_session(session.id).unwrap().is_some());
    }

    #[test]
    fn test_geofence_crud() {
        let db = FenceDb::in_memory().unwrap();
        let fence = Geofence::new("home", 41.9028, 12.4964)
            .with_radius(250.0)
            .with_transition_type(TransitionType::Dwell)
            .with_loitering_delay(120_000);

        let stored = db.save_geofence(&fence).unwrap();
        assert!(stored.created_at > 0);

        let loaded = db.get_geofence("home").unwrap().unwrap();
        assert_eq!(loaded, stored);

        // Same id replaces
        db.save_geofence(&fence.clone().with_radius(300.0)).unwrap();
        let fences = db.list_geofences().unwrap();
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].radius, 300.0);

        assert!(db.delete_geofence("home").unwrap());
        assert!(!db.delete_geofence("home").unwrap());
        assert!(db.get_geofence("home").unwrap().is_none());
    }

    #[test]
    fn test_invalid_geofence_not_saved() {
        let db = FenceDb::in_memory().unwrap();
        let result = db.save_geofence(&Geofence::new("bad", 0.0, 0.0).with_radius(-1.0));
        assert!(matches!(result, Err(FenceError::InvalidGeofence { .. })));
        assert!(db.list_geofences().unwrap().is_empty());
    }

    #[test]
    fn test_geofence_queries_respect_expiration() {
        let db = FenceDb::in_memory().unwrap();
        let mut short = Geofence::new("short", 0.0, 0.0).with_expiration_duration(1_000);
        short.created_at = 10_000;
        let mut long = Geofence::new("long", 0.0, 0.0).with_expiration_duration(100_000);
        long.created_at = 10_000;
        db.save_geofence(&short).unwrap();
        db.save_geofence(&long).unwrap();

        let inside = GpsPoint::new(0.001, 0.0);
        let ids: Vec<String> = db
            .geofences_containing(&inside, 20_000)
            .unwrap()
            .into_iter()
            .map(|g| g.fence_id)
            .collect();
        assert_eq!(ids, vec!["long".to_string()]);

        assert_eq!(db.delete_expired_geofences(20_000).unwrap(), 1);
        assert_eq!(db.list_geofences().unwrap().len(), 1);
    }

    #[test]
    fn test_state_edits_commit_with_the_batch() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();

        db.apply_batch(&[
            FenceOp::InsertPosition(new_position(session.id, 10, 45.0, 0.0)),
            FenceOp::UpdateSessionDistance {
                session_id: session.id,
                total_distance: 0.0,
            },
            FenceOp::State(StateEdit::Put(
                keys::LAST_LATITUDE,
                StateValue::Float(45.0),
            )),
        ])
        .unwrap();
        assert_eq!(db.get_f64(keys::LAST_LATITUDE).unwrap(), Some(45.0));

        // A failing session update takes the state edit down with it
        let result = db.apply_batch(&[
            FenceOp::State(StateEdit::Put(
                keys::LAST_LATITUDE,
                StateValue::Float(46.0),
            )),
            FenceOp::UpdateSessionDistance {
                session_id: session.id + 1,
                total_distance: 1.0,
            },
        ]);
        assert!(result.is_err());
        assert_eq!(db.get_f64(keys::LAST_LATITUDE).unwrap(), Some(45.0));
    }

    #[test]
    fn test_failed_state_write_rolls_back_position() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();
        db.fail_state_writes(keys::CURRENT_DISTANCE);

        let result = db.apply_batch(&[
            FenceOp::InsertPosition(new_position(session.id, 10, 45.0, 7.0)),
            FenceOp::UpdateSessionDistance {
                session_id: session.id,
                total_distance: 7.0,
            },
            FenceOp::State(StateEdit::Put(
                keys::CURRENT_DISTANCE,
                StateValue::Float(7.0),
            )),
        ]);
        assert!(matches!(result, Err(FenceError::Database(_))));
        assert_eq!(db.position_count(session.id).unwrap(), 0);
        assert_eq!(db.session_total(session.id).unwrap(), 0.0);
    }

    #[test]
    fn test_create_session_with_state() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db
            .create_session_with_state("massimo", 5_000, |id| {
                vec![StateEdit::Put(keys::CURRENT_SESSION_ID, StateValue::Int(id))]
            })
            .unwrap();
        assert_eq!(db.get_i64(keys::CURRENT_SESSION_ID).unwrap(), Some(session.id));
        assert_eq!(db.get_session(session.id).unwrap().unwrap(), session);

        // No session row survives a failed state write
        db.fail_state_writes(keys::CURRENT_SESSION_ID);
        let result = db.create_session_with_state("other", 6_000, |id| {
            vec![StateEdit::Put(keys::CURRENT_SESSION_ID, StateValue::Int(id))]
        });
        assert!(result.is_err());
        assert_eq!(db.list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_close_session_in_batch() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.create_session_at("massimo", 0).unwrap();

        db.apply_batch(&[
            FenceOp::CloseSession {
                session_id: session.id,
                end_date: 9_000,
            },
            FenceOp::State(StateEdit::Remove(keys::CURRENT_SESSION_ID)),
        ])
        .unwrap();
        assert_eq!(db.get_session(session.id).unwrap().unwrap().end_date, Some(9_000));

        let result = db.apply_batch(&[FenceOp::CloseSession {
            session_id: 404,
            end_date: 9_000,
        }]);
        assert!(matches!(result, Err(FenceError::SessionNotFound(404))));
    }
}
