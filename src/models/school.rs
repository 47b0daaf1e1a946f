// src/models/school.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'schools' table: the multi-tenancy boundary.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct School {
    pub id: i64,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for creating a school. Super admin only.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSchoolRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}
