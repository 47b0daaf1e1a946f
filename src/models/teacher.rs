// src/models/teacher.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// Represents the 'teachers' table: the roster the timetable allocator
/// draws from. Distinct from the login account (optionally linked via
/// `user_id`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Teacher {
    pub id: i64,
    pub school_id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    /// Subject names this teacher can be scheduled for.
    pub subjects: Json<Vec<String>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for creating a roster entry. Admin only.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeacherRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom(function = validate_subjects))]
    pub subjects: Vec<String>,
    pub user_id: Option<i64>,
}

/// DTO for updating a roster entry. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct UpdateTeacherRequest {
    pub name: Option<String>,
    pub subjects: Option<Vec<String>>,
    pub user_id: Option<i64>,
}

fn validate_subjects(subjects: &[String]) -> Result<(), validator::ValidationError> {
    if subjects.is_empty() {
        return Err(validator::ValidationError::new("subjects_cannot_be_empty"));
    }
    for s in subjects {
        if s.is_empty() || s.len() > 50 {
            return Err(validator::ValidationError::new("subject_length_invalid"));
        }
    }
    Ok(())
}
