//! Unified error handling for the friendfence library.
//!
//! Every fallible operation in the crate returns [`Result`], so callers on the
//! platform side only have to handle one error type.

use thiserror::Error;

/// Unified error type for friendfence operations.
#[derive(Debug, Error)]
pub enum FenceError {
    /// SQLite error from the session/position/geofence database
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema migration failed while opening the database
    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No session row exists with the given id
    #[error("Session {0} not found")]
    SessionNotFound(i64),

    /// A sample arrived while no session is being tracked
    #[error("No tracking session is active")]
    NotTracking,

    /// A sample arrived for a session other than the active one
    #[error("Sample for session {requested} but session {active} is active")]
    SessionMismatch { active: i64, requested: i64 },

    /// Coordinates are non-finite or outside the valid lat/lng range
    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// Geofence parameters are not usable
    #[error("Invalid geofence '{fence_id}': {message}")]
    InvalidGeofence { fence_id: String, message: String },

    /// Session document could not be parsed or describes an unusable session
    #[error("Invalid session document: {message}")]
    InvalidDocument { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for friendfence operations.
pub type Result<T> = std::result::Result<T, FenceError>;

/// Extension trait for converting lookups into [`FenceError`]s.
pub trait OptionExt<T> {
    /// Convert `None` into [`FenceError::SessionNotFound`].
    fn ok_or_session_not_found(self, session_id: i64) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_session_not_found(self, session_id: i64) -> Result<T> {
        self.ok_or(FenceError::SessionNotFound(session_id))
    }
}
