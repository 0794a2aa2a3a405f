//! Detected activity classification.
//!
//! Codes match the values delivered by the platform's activity recognition,
//! so they can be stored as plain integers and read back by other clients.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    InVehicle,
    OnBicycle,
    OnFoot,
    Still,
    #[default]
    Unknown,
    Tilting,
    Walking,
    Running,
}

impl ActivityType {
    /// Integer code stored in the database and the state store.
    pub fn code(self) -> i64 {
        match self {
            ActivityType::InVehicle => 0,
            ActivityType::OnBicycle => 1,
            ActivityType::OnFoot => 2,
            ActivityType::Still => 3,
            ActivityType::Unknown => 4,
            ActivityType::Tilting => 5,
            ActivityType::Walking => 7,
            ActivityType::Running => 8,
        }
    }

    /// Map a stored code back to a type. Unrecognised codes become `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ActivityType::InVehicle,
            1 => ActivityType::OnBicycle,
            2 => ActivityType::OnFoot,
            3 => ActivityType::Still,
            5 => ActivityType::Tilting,
            7 => ActivityType::Walking,
            8 => ActivityType::Running,
            _ => ActivityType::Unknown,
        }
    }

    /// Human-readable label for lists and notifications.
    pub fn label(self) -> &'static str {
        match self {
            ActivityType::InVehicle => "In vehicle",
            ActivityType::OnBicycle => "On bicycle",
            ActivityType::OnFoot => "On foot",
            ActivityType::Still => "Still",
            ActivityType::Unknown => "Unknown",
            ActivityType::Tilting => "Tilting",
            ActivityType::Walking => "Walking",
            ActivityType::Running => "Running",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
