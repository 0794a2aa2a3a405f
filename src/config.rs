//! Runtime configuration.

use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{FenceError, Result};

/// Owner label used when the platform has no signed-in user.
pub const DEFAULT_OWNER: &str = "defaultUser";

/// Configuration for the tracking service.
///
/// Every field has a default, so a JSON file only needs the keys it overrides.
///
/// # Example
/// ```
/// use friendfence::FenceConfig;
///
/// let config = FenceConfig::from_json_str(r#"{ "dbPath": "/data/fence.db" }"#).unwrap();
/// assert_eq!(config.db_path, "/data/fence.db");
/// assert_eq!(config.default_geofence_radius, 500.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FenceConfig {
    /// SQLite database file. `:memory:` gives a throwaway database.
    pub db_path: String,
    /// Owner label for sessions started without an explicit owner.
    pub default_owner: String,
    /// Douglas-Peucker tolerance (degrees) for map paths. 0 keeps every point.
    pub path_simplification_tolerance: f64,
    /// Radius in meters for new geofences.
    pub default_geofence_radius: f64,
    /// Lifetime in milliseconds for new geofences.
    pub default_geofence_duration_ms: i64,
    /// Maximum level for the platform logger (`off`, `error` .. `trace`).
    pub log_level: String,
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            db_path: "friendfence.db".to_string(),
            default_owner: DEFAULT_OWNER.to_string(),
            path_simplification_tolerance: 0.0,
            default_geofence_radius: 500.0,
            default_geofence_duration_ms: 24 * 60 * 60 * 1000,
            log_level: "debug".to_string(),
        }
    }
}

impl FenceConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FenceConfig = serde_json::from_str(json).map_err(|e| FenceError::Config {
            message: format!("invalid JSON: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| FenceError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// In-memory configuration for tests and previews.
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            ..Self::default()
        }
    }

    /// Parsed [`FenceConfig::log_level`].
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level).map_err(|_| FenceError::Config {
            message: format!("unknown logLevel '{}'", self.log_level),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.is_empty() {
            return Err(FenceError::Config {
                message: "dbPath must not be empty".to_string(),
            });
        }
        if self.path_simplification_tolerance.is_nan() || self.path_simplification_tolerance < 0.0 {
            return Err(FenceError::Config {
                message: "pathSimplificationTolerance must be >= 0".to_string(),
            });
        }
        if self.default_geofence_radius.is_nan() || self.default_geofence_radius <= 0.0 {
            return Err(FenceError::Config {
                message: "defaultGeofenceRadius must be > 0".to_string(),
            });
        }
        self.log_level_filter()?;
        Ok(())
    }
}
