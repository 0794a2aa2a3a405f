use log::info;
use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::Result;

/// Version 1: sessions, their positions and geofences.
const CREATE_TABLES: &str = r#"
    CREATE TABLE sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        start_date INTEGER NOT NULL,
        end_date INTEGER,
        total_distance REAL NOT NULL DEFAULT 0
    );

    CREATE TABLE positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL,
        position_time INTEGER NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        altitude REAL,
        distance REAL NOT NULL DEFAULT 0,
        activity INTEGER NOT NULL DEFAULT 4,
        FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
    );

    CREATE TABLE geofences (
        fence_id TEXT PRIMARY KEY,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        radius REAL NOT NULL,
        duration INTEGER NOT NULL,
        transition_type INTEGER NOT NULL
    );
"#;

/// Version 2: trigger tuning and creation time on geofences, position lookup index.
const ADD_GEOFENCE_TRIGGERS: &str = r#"
    ALTER TABLE geofences ADD COLUMN responsiveness INTEGER NOT NULL DEFAULT 60000;
    ALTER TABLE geofences ADD COLUMN loitering_delay INTEGER NOT NULL DEFAULT 3600000;
    ALTER TABLE geofences ADD COLUMN created_at INTEGER NOT NULL DEFAULT 0;

    CREATE INDEX IF NOT EXISTS idx_positions_session_time
    ON positions(session_id, position_time);
"#;

/// Version 3: tracking state, so it commits together with session rows.
const CREATE_SERVICE_STATE: &str = r#"
    CREATE TABLE IF NOT EXISTS service_state (
        key TEXT PRIMARY KEY,
        value NOT NULL
    );
"#;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(CREATE_TABLES),
        M::up(ADD_GEOFENCE_TRIGGERS),
        M::up(CREATE_SERVICE_STATE),
    ])
}

/// Bring the schema to the latest version.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    info!("Running schema migrations");
    migrations().to_latest(conn)?;
    Ok(())
}
