//! Persisted key-value store for the tracking state.
//!
//! The state has to survive a process restart between two location callbacks,
//! so it is written through on every change. Multi-key edits are applied
//! atomically: a reader never sees a new coordinate with an old distance.
//!
//! [`crate::FenceDb`] implements [`StateStore`] on its own `service_state`
//! table, so state edits can share a transaction with session and position
//! writes.

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Keys used by [`crate::SessionState`].
pub mod keys {
    pub const CURRENT_SESSION_ID: &str = "current_session_id";
    pub const LAST_LATITUDE: &str = "last_latitude";
    pub const LAST_LONGITUDE: &str = "last_longitude";
    pub const CURRENT_DISTANCE: &str = "current_distance";
    pub const ACTIVITY_STATE: &str = "activity_state";
}

/// A stored value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateValue {
    Int(i64),
    Float(f64),
}

impl StateValue {
    /// Integer value. `None` for a float, which is never a valid id or code.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            StateValue::Int(v) => Some(v),
            StateValue::Float(_) => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            StateValue::Int(v) => v as f64,
            StateValue::Float(v) => v,
        }
    }
}

/// One change inside an atomic edit.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEdit {
    Put(&'static str, StateValue),
    Remove(&'static str),
}

/// Persisted key-value store with atomic multi-key edits.
pub trait StateStore {
    /// Read a value. `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<StateValue>>;

    /// Apply all edits or none of them.
    fn apply(&mut self, edits: &[StateEdit]) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key)?.and_then(StateValue::as_i64))
    }

    fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.get(key)?.map(StateValue::as_f64))
    }
}

// ============================================================================
// SQLite rows
// ============================================================================

/// Read one key from the `service_state` table.
pub(crate) fn read_state(conn: &Connection, key: &str) -> Result<Option<StateValue>> {
    let value: Option<Value> = conn
        .query_row(
            "SELECT value FROM service_state WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|v| match v {
        Value::Integer(i) => Some(StateValue::Int(i)),
        Value::Real(f) => Some(StateValue::Float(f)),
        _ => None,
    }))
}

/// Write one edit to the `service_state` table. Returns the rows changed.
///
/// Takes a plain connection so callers can pass an open transaction.
pub(crate) fn write_state(conn: &Connection, edit: &StateEdit) -> rusqlite::Result<usize> {
    match edit {
        StateEdit::Put(key, value) => {
            let value = match *value {
                StateValue::Int(i) => Value::Integer(i),
                StateValue::Float(f) => Value::Real(f),
            };
            conn.execute(
                "INSERT INTO service_state (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
        }
        StateEdit::Remove(key) => {
            conn.execute("DELETE FROM service_state WHERE key = ?", params![key])
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Non-persistent store, for tests and for platforms that keep state elsewhere.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    values: HashMap<String, StateValue>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<StateValue>> {
        Ok(self.values.get(key).copied())
    }

    fn apply(&mut self, edits: &[StateEdit]) -> Result<()> {
        for edit in edits {
            match edit {
                StateEdit::Put(key, value) => {
                    self.values.insert((*key).to_string(), *value);
                }
                StateEdit::Remove(key) => {
                    self.values.remove(*key);
                }
            }
        }
        Ok(())
    }
}
