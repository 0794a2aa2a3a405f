//! # Session Export
//!
//! A session and its positions as one JSON document, used for backups and for
//! moving a session between devices. Dates are UTC with millisecond precision
//! (`2015-03-01T10:15:30.250Z`).
//!
//! ```json
//! {
//!   "session_owner": "massimo",
//!   "start_date": "2015-03-01T10:15:30.250Z",
//!   "end_date": "2015-03-01T11:02:12.000Z",
//!   "totalDistance": 1532.7,
//!   "positions": [
//!     { "activity": 7, "latitude": 45.46, "longitude": 9.19,
//!       "distance": 0.0, "position_time": "2015-03-01T10:15:31.000Z" }
//!   ]
//! }
//! ```
//!
//! Importing always creates a new closed session. The stored total is the sum
//! of the imported increments, whatever `totalDistance` says.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::error::{FenceError, OptionExt, Result};
use crate::geo_utils::GpsPoint;
use crate::persistence::{FenceDb, Position, Session};

/// Allowed gap between `totalDistance` and the sum of the increments.
const TOTAL_TOLERANCE_METERS: f64 = 0.01;

/// Exchange form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "session_owner")]
    pub owner: String,
    #[serde(with = "iso_millis")]
    pub start_date: i64,
    #[serde(default, with = "iso_millis_opt", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    #[serde(rename = "totalDistance")]
    pub total_distance: f64,
    #[serde(default)]
    pub positions: Vec<PositionDocument>,
}

/// Exchange form of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDocument {
    /// Activity code, see [`ActivityType::code`]
    pub activity: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub distance: f64,
    #[serde(rename = "position_time", with = "iso_millis")]
    pub time: i64,
}

impl From<&Position> for PositionDocument {
    fn from(position: &Position) -> Self {
        Self {
            activity: position.activity_type.code(),
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            distance: position.distance,
            time: position.time,
        }
    }
}

impl SessionDocument {
    /// Check every position and return the recomputed total.
    fn checked_total(&self) -> Result<f64> {
        let mut total = 0.0;
        for (i, position) in self.positions.iter().enumerate() {
            let point = GpsPoint::new(position.latitude, position.longitude);
            if !point.is_valid() {
                return Err(FenceError::InvalidCoordinates {
                    latitude: position.latitude,
                    longitude: position.longitude,
                });
            }
            if !position.distance.is_finite() || position.distance < 0.0 {
                return Err(FenceError::InvalidDocument {
                    message: format!("position {} has distance {}", i, position.distance),
                });
            }
            total += position.distance;
        }
        Ok(total)
    }
}

/// Format epoch milliseconds as `yyyy-MM-ddTHH:mm:ss.SSSZ`.
pub fn format_timestamp(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn parse_timestamp(text: &str) -> std::result::Result<i64, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.timestamp_millis())
}

mod iso_millis {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        let text = super::format_timestamp(*ms)
            .ok_or_else(|| ser::Error::custom(format!("timestamp {} out of range", ms)))?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text).map_err(de::Error::custom)
    }
}

mod iso_millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match ms {
            Some(ms) => super::iso_millis::serialize(ms, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| super::parse_timestamp(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl FenceDb {
    /// Display name of a session: `owner - start date`.
    pub fn session_name(&self, session_id: i64) -> Result<String> {
        let session = self
            .get_session(session_id)?
            .ok_or_session_not_found(session_id)?;
        let date = format_timestamp(session.start_date).unwrap_or_default();
        Ok(format!("{} - {}", session.owner, date))
    }

    /// Session and positions as an exchange document.
    pub fn export_session(&self, session_id: i64) -> Result<SessionDocument> {
        let session = self
            .get_session(session_id)?
            .ok_or_session_not_found(session_id)?;
        let positions = self.positions_for_session(session_id)?;

        Ok(SessionDocument {
            owner: session.owner,
            start_date: session.start_date,
            end_date: session.end_date,
            total_distance: session.total_distance,
            positions: positions.iter().map(PositionDocument::from).collect(),
        })
    }

    /// Session and positions as pretty-printed JSON.
    pub fn export_session_json(&self, session_id: i64) -> Result<String> {
        let document = self.export_session(session_id)?;
        serde_json::to_string_pretty(&document).map_err(|e| FenceError::InvalidDocument {
            message: e.to_string(),
        })
    }

    /// Store a document as a new closed session in one transaction.
    ///
    /// A missing end date becomes the time of the last position (or the start
    /// date when there are none).
    pub fn import_session(&mut self, document: &SessionDocument) -> Result<Session> {
        let total = document.checked_total()?;
        if (total - document.total_distance).abs() > TOTAL_TOLERANCE_METERS {
            warn!(
                "[FenceDb] Imported total {:.2}m does not match positions ({:.2}m), using positions",
                document.total_distance, total
            );
        }
        let end_date = document.end_date.unwrap_or_else(|| {
            document
                .positions
                .iter()
                .map(|p| p.time)
                .max()
                .unwrap_or(document.start_date)
        });

        let tx = self.db.transaction()?;
        tx.execute(
            "INSERT INTO sessions (owner, start_date, end_date, total_distance) VALUES (?, ?, ?, ?)",
            params![document.owner, document.start_date, end_date, total],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO positions
                    (session_id, position_time, latitude, longitude, altitude, distance, activity)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            for position in &document.positions {
                stmt.execute(params![
                    id,
                    position.time,
                    position.latitude,
                    position.longitude,
                    position.altitude,
                    position.distance,
                    ActivityType::from_code(position.activity).code(),
                ])?;
            }
        }
        tx.commit()?;

        info!(
            "[FenceDb] Imported session {} for {} ({} positions, {:.1}m)",
            id,
            document.owner,
            document.positions.len(),
            total
        );
        Ok(Session {
            id,
            owner: document.owner.clone(),
            start_date: document.start_date,
            end_date: Some(end_date),
            total_distance: total,
        })
    }

    /// Parse a JSON document and import it, see [`FenceDb::import_session`].
    pub fn import_session_json(&mut self, json: &str) -> Result<Session> {
        let document: SessionDocument =
            serde_json::from_str(json).map_err(|e| FenceError::InvalidDocument {
                message: e.to_string(),
            })?;
        self.import_session(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{FenceOp, NewPosition};

    const START: i64 = 1_425_204_930_250;

    fn recorded_session(db: &mut FenceDb) -> Session {
        let session = db.create_session_at("massimo", START).unwrap();
        let points = [(45.4642, 9.19), (45.4650, 9.1912), (45.4663, 9.1930)];
        let mut total = 0.0;
        let mut previous: Option<GpsPoint> = None;

        for (i, (lat, lng)) in points.into_iter().enumerate() {
            let point = GpsPoint::new(lat, lng);
            let distance = previous.map_or(0.0, |p| p.distance_to(&point));
            total += distance;
            db.apply_batch(&[
                FenceOp::InsertPosition(NewPosition {
                    session_id: session.id,
                    time: START + 1000 * (i as i64 + 1),
                    point,
                    altitude: if i == 0 { Some(120.5) } else { None },
                    distance,
                    activity_type: ActivityType::Walking,
                }),
                FenceOp::UpdateSessionDistance {
                    session_id: session.id,
                    total_distance: total,
                },
            ])
            .unwrap();
            previous = Some(point);
        }
        db.close_session_at(session.id, START + 10_000).unwrap();
        db.get_session(session.id).unwrap().unwrap()
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut source = FenceDb::in_memory().unwrap();
        let session = recorded_session(&mut source);
        let json = source.export_session_json(session.id).unwrap();

        let mut target = FenceDb::in_memory().unwrap();
        let imported = target.import_session_json(&json).unwrap();

        assert_eq!(imported.owner, "massimo");
        assert_eq!(imported.start_date, START);
        assert_eq!(imported.end_date, Some(START + 10_000));
        assert!((imported.total_distance - session.total_distance).abs() < 1e-9);
        assert_eq!(target.session_total(imported.id).unwrap(), imported.total_distance);

        let before = source.positions_for_session(session.id).unwrap();
        let after = target.positions_for_session(imported.id).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(PositionDocument::from(a), PositionDocument::from(b));
        }
    }

    #[test]
    fn test_export_uses_exchange_field_names() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = recorded_session(&mut db);
        let json = db.export_session_json(session.id).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["session_owner"], "massimo");
        assert_eq!(value["start_date"], "2015-03-01T10:15:30.250Z");
        assert!(value["totalDistance"].as_f64().unwrap() > 0.0);
        let first = &value["positions"][0];
        assert_eq!(first["activity"], ActivityType::Walking.code());
        assert_eq!(first["position_time"], "2015-03-01T10:15:31.250Z");
        assert_eq!(first["altitude"], 120.5);
        assert!(value["positions"][1].get("altitude").is_none());
    }

    #[test]
    fn test_import_recomputes_total() {
        let json = r#"{
            "session_owner": "anna",
            "start_date": "2015-03-01T10:00:00.000Z",
            "end_date": "2015-03-01T10:30:00.000Z",
            "totalDistance": 99999.0,
            "positions": [
                {"activity": 7, "latitude": 45.0, "longitude": 9.0, "distance": 0.0,
                 "position_time": "2015-03-01T10:00:01.000Z"},
                {"activity": 7, "latitude": 45.001, "longitude": 9.0, "distance": 111.2,
                 "position_time": "2015-03-01T10:00:02.000Z"},
                {"activity": 6, "latitude": 45.002, "longitude": 9.0, "distance": 111.3,
                 "position_time": "2015-03-01T10:00:03.000Z"}
            ]
        }"#;
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.import_session_json(json).unwrap();

        assert!((session.total_distance - 222.5).abs() < 1e-9);
        assert_eq!(db.session_total(session.id).unwrap(), session.total_distance);
        let positions = db.positions_for_session(session.id).unwrap();
        assert_eq!(positions[2].activity_type, ActivityType::Unknown);
    }

    #[test]
    fn test_import_without_end_date_is_closed() {
        let json = r#"{
            "session_owner": "anna",
            "start_date": "2015-03-01T10:00:00.000Z",
            "totalDistance": 0.0,
            "positions": [
                {"activity": 7, "latitude": 45.0, "longitude": 9.0, "distance": 0.0,
                 "position_time": "2015-03-01T10:05:00.000Z"}
            ]
        }"#;
        let mut db = FenceDb::in_memory().unwrap();
        let session = db.import_session_json(json).unwrap();
        assert!(!session.is_open());
        assert_eq!(session.end_date, Some(parse_timestamp("2015-03-01T10:05:00.000Z").unwrap()));
    }

    #[test]
    fn test_rejected_import_writes_nothing() {
        let mut db = FenceDb::in_memory().unwrap();

        let bad_point = r#"{
            "session_owner": "anna",
            "start_date": "2015-03-01T10:00:00.000Z",
            "totalDistance": 0.0,
            "positions": [
                {"activity": 7, "latitude": 45.0, "longitude": 9.0, "distance": 0.0,
                 "position_time": "2015-03-01T10:00:01.000Z"},
                {"activity": 7, "latitude": 95.0, "longitude": 9.0, "distance": 10.0,
                 "position_time": "2015-03-01T10:00:02.000Z"}
            ]
        }"#;
        assert!(matches!(
            db.import_session_json(bad_point),
            Err(FenceError::InvalidCoordinates { .. })
        ));

        let negative = bad_point.replace("95.0", "45.1").replace("10.0", "-3.0");
        assert!(matches!(
            db.import_session_json(&negative),
            Err(FenceError::InvalidDocument { .. })
        ));

        let bad_date = r#"{"session_owner": "anna", "start_date": "yesterday", "totalDistance": 0.0}"#;
        assert!(matches!(
            db.import_session_json(bad_date),
            Err(FenceError::InvalidDocument { .. })
        ));
        assert!(db.import_session_json("not json").is_err());

        assert!(db.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_session_name() {
        let mut db = FenceDb::in_memory().unwrap();
        let session = recorded_session(&mut db);
        assert_eq!(
            db.session_name(session.id).unwrap(),
            "massimo - 2015-03-01T10:15:30.250Z"
        );
        assert!(matches!(
            db.session_name(session.id + 1),
            Err(FenceError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_missing_session_export_fails() {
        let db = FenceDb::in_memory().unwrap();
        assert!(matches!(
            db.export_session_json(5),
            Err(FenceError::SessionNotFound(5))
        ));
    }
}
