//! Database models
//!
//! One struct per ledger table, read back with `sqlx::FromRow`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Row of `vehicles`: every plate ever seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VehicleRow {
    pub plate: String,
    pub color: String,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
}

/// Row of `detections`: one per processed detection event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetectionRow {
    pub id: i64,
    pub plate: String,
    pub color: String,
    pub timestamp: NaiveDateTime,
    pub source: String,
    pub bbox: Option<String>,
    pub is_violation: bool,
    pub reason: String,
    pub photo_path: Option<String>,
}

/// Row of `violations`: persisted fines, gated by the cooldown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ViolationRow {
    pub id: i64,
    pub plate: String,
    pub color: String,
    pub timestamp: NaiveDateTime,
    pub reason: String,
    pub photo_path: Option<String>,
}
