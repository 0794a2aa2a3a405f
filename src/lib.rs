//! FriendFence - session tracking core
//!
//! This crate provides:
//! - Persistent tracking state that survives service restarts
//! - Position recording with incremental distance accumulation
//! - SQLite storage for sessions, positions and geofences
//! - Session paths for map display, split by activity type
//! - JSON export and import of sessions
//!
//! # Quick Start
//! ```
//! use friendfence::{FenceConfig, GpsPoint, LogNotificationSink, TrackingEvent, TrackingService};
//! use friendfence::{ActivityType, LocationSample};
//!
//! let mut service =
//!     TrackingService::open(FenceConfig::in_memory(), LogNotificationSink::new()).unwrap();
//! let session = service.start_tracking(Some("massimo")).unwrap();
//!
//! service
//!     .handle(TrackingEvent::ActivityDetected(ActivityType::Walking))
//!     .unwrap();
//! service
//!     .handle(TrackingEvent::Location(LocationSample {
//!         session_id: session.id,
//!         point: GpsPoint::new(45.4642, 9.19),
//!         altitude: None,
//!         time: 0,
//!     }))
//!     .unwrap();
//!
//! let path = service.session_path(session.id).unwrap();
//! assert_eq!(path.segments[0].activity_type, ActivityType::Walking);
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod export;
pub mod geo_utils;
pub mod geofence;
mod migrations;
pub mod notification;
pub mod path;
pub mod persistence;
pub mod recorder;
pub mod service;
pub mod state;
pub mod store;

pub use activity::ActivityType;
pub use config::FenceConfig;
pub use error::{FenceError, OptionExt, Result};
pub use export::{PositionDocument, SessionDocument};
pub use geo_utils::{haversine_distance, polyline_length, Bounds, GpsPoint};
pub use geofence::{Geofence, TransitionType};
pub use notification::{format_distance, LogNotificationSink, NotificationSink};
pub use path::{decode_polyline, PathSegment, SessionPath};
pub use persistence::{FenceDb, FenceOp, NewPosition, OpResult, Position, Session};
pub use recorder::{LocationSample, PositionRecorder};
pub use service::{EventOutcome, TrackingEvent, TrackingService};
pub use state::{DistanceUpdate, SessionState};
pub use store::{MemoryStateStore, StateEdit, StateStore, StateValue};

/// Route `log` records to logcat, capped at the configured level.
#[cfg(target_os = "android")]
pub(crate) fn init_logging(level: log::LevelFilter) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(level)
            .with_tag("FriendFence"),
    );
}

/// Other platforms install their own logger; only the level cap applies.
#[cfg(not(target_os = "android"))]
pub(crate) fn init_logging(level: log::LevelFilter) {
    if level < log::max_level() {
        log::set_max_level(level);
    }
}
