// src/models/timetable.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

use crate::allocator::{ClassGroup, PeriodSlot, RosterTeacher, SoftConstraints};

/// Represents the 'timetables' table: the weekly schedule container for one
/// class-section. Entries are replaced wholesale on regeneration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Timetable {
    pub id: i64,
    pub school_id: i64,
    pub class_name: String,
    pub section: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'timetable_entries' table: a single (day, period) cell.
/// `school_id` is denormalized so the teacher-per-slot uniqueness can be
/// enforced across all timetables of a school by one index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub id: i64,
    pub timetable_id: i64,
    pub school_id: i64,
    pub day: String,
    pub period_number: i64,
    pub start_time: String,
    pub end_time: String,
    pub subject: Option<String>,
    pub teacher_id: Option<i64>,
    pub teacher_name: Option<String>,
    pub room: Option<String>,
    /// 'regular', 'lab', 'activity', 'break' or 'lunch'.
    pub entry_kind: String,
}

/// DTO for a generation run. When `teachers` is empty the stored roster of
/// the caller's school is used instead.
#[derive(Debug, Deserialize)]
pub struct GenerateTimetableRequest {
    #[serde(default)]
    pub teachers: Vec<RosterTeacher>,
    pub classes: Vec<ClassGroup>,
    pub working_days: Vec<String>,
    pub periods: Vec<PeriodSlot>,
    pub subject_hours_per_week: HashMap<String, u32>,
    #[serde(default)]
    pub constraints: SoftConstraints,
}

/// DTO for an admin overwriting a single cell without re-running the
/// allocator. `start_time`/`end_time` are required only when the cell does
/// not exist yet.
#[derive(Debug, Deserialize)]
pub struct UpdateEntryRequest {
    pub day: String,
    pub period_number: i64,
    pub subject: String,
    pub teacher_id: i64,
    pub room: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}
